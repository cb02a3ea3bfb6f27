pub mod bus;
pub mod config;
pub mod db;
pub mod health;
