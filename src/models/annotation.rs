use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The closed set of categories the annotator may assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Frontend,
    Backend,
    Infrastructure,
    #[serde(rename = "AI/ML")]
    AiMl,
    Mobile,
    #[serde(rename = "Data Engineering")]
    DataEngineering,
    Security,
    Culture,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Frontend,
        Category::Backend,
        Category::Infrastructure,
        Category::AiMl,
        Category::Mobile,
        Category::DataEngineering,
        Category::Security,
        Category::Culture,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Frontend => "Frontend",
            Category::Backend => "Backend",
            Category::Infrastructure => "Infrastructure",
            Category::AiMl => "AI/ML",
            Category::Mobile => "Mobile",
            Category::DataEngineering => "Data Engineering",
            Category::Security => "Security",
            Category::Culture => "Culture",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|c| c.as_str()).collect()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown category: {}", wanted))
    }
}

/// Annotator output for one post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub post_id: String,
    pub keywords: Vec<String>,
    pub category: Category,
    pub summary: String,
}
