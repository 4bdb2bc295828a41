pub mod config;
pub mod diagonal;
pub mod double_gaussian;
pub mod error;
pub mod io;
pub mod low_rank;
pub mod posterior;
pub mod runner;
pub mod stats;
pub mod transforms;
