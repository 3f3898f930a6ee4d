//! Occupancy estimation from a snapshot URL.

use anyhow::{anyhow, Result};
use regex::Regex;
use std::sync::OnceLock;

mod openai;

pub use openai::{OpenAiClassifier, OpenAiConfig};

pub trait OccupancyClassifier {
    /// Number of people visible in the image at `image_url`.
    fn estimate(&mut self, image_url: &str) -> Result<u32>;
}

/// Returns the same count for every image. Used for dry runs and tests.
#[derive(Clone, Debug)]
pub struct FixedClassifier {
    count: u32,
    calls: Vec<String>,
}

impl FixedClassifier {
    pub fn new(count: u32) -> Self {
        Self {
            count,
            calls: Vec::new(),
        }
    }

    /// URLs this classifier has been asked about, oldest first.
    pub fn calls(&self) -> &[String] {
        &self.calls
    }
}

impl OccupancyClassifier for FixedClassifier {
    fn estimate(&mut self, image_url: &str) -> Result<u32> {
        self.calls.push(image_url.to_string());
        Ok(self.count)
    }
}

fn count_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d+").expect("static regex"))
}

/// Pulls the head count out of a model reply.
///
/// Models asked for "a single number" still answer "3", "3." or "There are 3
/// people"; the first run of digits wins. A reply without digits is an error.
pub fn parse_occupancy(reply: &str) -> Result<u32> {
    let trimmed = reply.trim();
    let digits = count_pattern()
        .find(trimmed)
        .ok_or_else(|| anyhow!("model reply has no count: {:?}", trimmed))?;
    digits
        .as_str()
        .parse()
        .map_err(|e| anyhow!("model count {:?} out of range: {}", digits.as_str(), e))
}
