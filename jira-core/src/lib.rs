mod client;

pub use client::{JiraClient, JiraError, SearchPage};
