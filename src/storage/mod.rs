pub mod s5_client;

pub use s5_client::{
    raw_cid, MockS5Backend, RealS5Backend, S5Backend, S5Client, S5ClientConfig, S5Storage,
    S5StorageConfig, StorageError,
};
