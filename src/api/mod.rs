// =============================================================================
// Status API Module
// =============================================================================
//
// Read-only REST surface over Persistence: health, signals, watchlist,
// parameters, performance, and the optimisation log.

pub mod rest;
