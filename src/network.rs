// Wire format shared with the client and server processes

pub mod message;

pub use message::Package;
