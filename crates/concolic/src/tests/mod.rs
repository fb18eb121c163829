mod config;
mod fixture;
