mod collection;
mod store;

pub use collection::JsonCollection;
pub use store::JsonStore;
