//! Process shell for the coordination platform: wires `meshqueue-storage`'s
//! tables and `meshqueue-engine`'s loops into a CLI.

pub mod commands;
pub mod config;
pub mod migrate;
