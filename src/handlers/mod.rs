// handlers/mod.rs - two handler tiers
//
// Public (no identity) -> Protected (identity resolved by middleware, Caller extension).
// Protected handlers never assume authentication: each operation states what it requires
// through the authorization gate.
pub mod protected;
pub mod public;
