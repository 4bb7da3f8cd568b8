pub mod archive;
pub mod configs;
pub mod manifest;
pub mod output;
pub mod receive;
pub mod share;
pub mod transport;
