pub mod alias;
pub mod config;
pub mod models;
pub mod owner;
pub mod repository;
pub mod service;
pub mod storage;
