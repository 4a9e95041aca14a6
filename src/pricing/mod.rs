mod cache;
mod source;

pub use cache::{PriceCache, WSOL_MINT};
pub use source::{BirdeyePriceSource, JupiterPriceSource, PriceSource};
