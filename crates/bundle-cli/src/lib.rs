//! Library components of the bundle updater command line.

pub mod logging;
