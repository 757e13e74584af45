pub mod check;
pub mod context;
pub mod graph;
pub mod synth;
