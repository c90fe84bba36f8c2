mod migrations;
mod repository;

pub use repository::Repository;
