//! Shared configuration types for the hopper ETL engine.

pub mod shared;
