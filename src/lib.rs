

pub mod captcha;
pub mod core;
pub mod resolution;
pub mod service;
pub mod sources;
pub mod tasks;
pub mod utils;
pub mod worker;

pub use utils::{mask_identifier, safe_truncate, safe_truncate_ellipsis};


pub use core::config::ResolverConfig;
pub use core::error::{ResolverError, Result};
pub use resolution::{ResolutionOrchestrator, ResolutionRequest, ResolutionResult, ResolutionStatus, Resolver};
pub use service::{ResolverService, ServiceParts};
pub use tasks::{BulkTask, BulkTaskManager, TaskKind, TaskStatus};


pub const DEFAULT_CAPTCHA_SERVICE_URL: &str = "http://2captcha.com";


pub const DEFAULT_SITE_KEY: &str = "6Lc9DmgrAAAAAJAjWVhjDy1KSgqzqJikY5z7I9SV";


pub const DEFAULT_PAGE_URL: &str = "https://eleccionescolombia.registraduria.gov.co/identificacion";


pub const DEFAULT_TOKEN_POOL_CAPACITY: usize = 3;


pub const DEFAULT_TOKEN_TTL: u64 = 90;


pub const DEFAULT_FAILURE_COOLDOWN: u64 = 1200;


pub const DEFAULT_ITEM_TIMEOUT: u64 = 360;


pub const DEFAULT_MAX_BULK_ITEMS: usize = 100;
