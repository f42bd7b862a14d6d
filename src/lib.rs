pub mod config {
    pub mod settings;
}
pub mod services {
    pub mod candles;
    pub mod orderbook;
    pub mod orchestrator;
    pub mod indicators;

    pub mod exchange;
    pub mod hub;
    pub mod strategies {
        pub mod common;
        pub use common::{Candle, Signal, Strategy};
        pub mod hold;
    }
}

pub mod utils;
