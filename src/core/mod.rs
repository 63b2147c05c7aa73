//! Surveying computations.

pub mod angles;
pub mod coords;
pub mod leveling;
pub mod network;
pub mod traverse;
pub mod triangulation;
