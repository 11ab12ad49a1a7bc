pub mod balancer;
pub mod band_eval;
pub mod feasibility;
pub mod sources;
