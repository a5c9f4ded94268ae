mod efile;
pub use efile::{EFile, EFileKind};

pub mod error;

pub mod config;

pub mod settings;

pub mod codec;

pub mod iter;

pub mod ext {
    pub mod merge;
    pub mod sort;
}

pub mod synchro;
