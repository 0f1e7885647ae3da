pub mod cli;
pub mod config;
pub mod deploy;
pub mod game;
pub mod linkprobe;
pub mod merge;
pub mod modid;
pub mod overwrite;
pub mod paths;
pub mod profile;
