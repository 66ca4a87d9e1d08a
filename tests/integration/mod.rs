mod database_integration;
mod sweep_integration;
