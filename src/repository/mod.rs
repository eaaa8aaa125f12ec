pub mod orders;

pub use orders::{OrderRepository, RepoError, SeaOrmOrderRepository, UniqueField};
