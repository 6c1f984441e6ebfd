// Assets module
// Remote meditation listing, payload download and the local cache

pub mod cache;
pub mod models;
pub mod scanner;
pub mod store;

pub use cache::{AssetCache, AssetListing, PurgeReport};
pub use models::{MeditationAsset, RemoteAsset};
pub use scanner::{decode_id, encode_id, CacheScanner};
pub use store::{AssetStore, HttpAssetStore};
