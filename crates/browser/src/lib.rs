//! Browser automation for remote agents.
//!
//! - `engine`: the traits a browser backend implements
//! - `cdp`: Chromium over the DevTools Protocol
//! - `driver`: session lifecycle and retried, humanized primitives
//! - `portals`: per-portal application strategies and their dispatcher
//! - `scrape`: job search, deep scrape and auto-apply
//! - `testing`: scripted fake engine

pub mod cdp;
pub mod driver;
pub mod engine;
pub mod fingerprint;
pub mod humanize;
pub mod portals;
pub mod profile;
pub mod scrape;
pub mod testing;

pub use cdp::CdpEngine;
pub use driver::{BrowserDriver, Session};
pub use engine::{BoundingBox, BrowserContext, BrowserEngine, LaunchOptions, Page};
pub use fingerprint::Fingerprint;
pub use portals::{
    ApplyOutcome, ApplyRequest, FieldMapper, HeuristicFieldMapper, PortalRegistry, PortalStrategy,
    VerificationCodeSource,
};
pub use profile::UserProfile;
pub use scrape::{AutoApplyReport, JobListing, JobScraper, ScrapeReport};
