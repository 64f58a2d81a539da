

mod pool;
mod solver;

pub use pool::{PoolSettings, PoolStats, Token, TokenCache};
pub use solver::{ChallengeSite, ChallengeSolver, SolverError, TwoCaptchaSolver};
