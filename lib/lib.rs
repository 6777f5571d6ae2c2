//! Client-side cache-coherency core for a network filesystem redirector.

pub mod fs;
pub mod sync;
