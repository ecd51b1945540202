use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("interface {name} not found")]
    InterfaceNotFound { name: String },

    #[error("failed to identify capture interface for the {role} network adapter")]
    AdapterNotFound { role: String },

    #[error("rebind to WAN/tunnel interface {name} is not supported")]
    UnsupportedTunnel { name: String },

    #[error("{role} adapter has no {what}")]
    MissingAddress { role: String, what: &'static str },

    #[error("failed to start filtering on {role} network interface {name}")]
    ActivationFailed { role: String, name: String },
}

pub type Result<T> = std::result::Result<T, Error>;
