pub mod supportability;
