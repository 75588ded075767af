// src/lib.rs — Library root for Dostt

pub mod api;
pub mod billing;
pub mod cli;
pub mod directory;
pub mod infra;
pub mod storage;
