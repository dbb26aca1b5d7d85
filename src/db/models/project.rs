//! Project: a deployable unit tracked by the core (§3 Data Model).

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Framework {
    Static,
    Nodejs,
    Nextjs,
    Django,
}

impl std::fmt::Display for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static => write!(f, "STATIC"),
            Self::Nodejs => write!(f, "NODEJS"),
            Self::Nextjs => write!(f, "NEXTJS"),
            Self::Django => write!(f, "DJANGO"),
        }
    }
}

impl std::str::FromStr for Framework {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "STATIC" => Ok(Self::Static),
            "NODEJS" => Ok(Self::Nodejs),
            "NEXTJS" => Ok(Self::Nextjs),
            "DJANGO" => Ok(Self::Django),
            other => anyhow::bail!("unknown framework: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: String,
    pub user_id: String,
    pub name: String,
    /// Globally unique; doubles as the container-name root and the default subdomain.
    pub slug: String,
    pub repo_url: String,
    pub framework: String,
    pub branch: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Project {
    pub fn framework_enum(&self) -> anyhow::Result<Framework> {
        self.framework.parse()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub slug: String,
    pub repo_url: String,
    pub framework: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framework_round_trips_through_display_and_parse() {
        for f in [
            Framework::Static,
            Framework::Nodejs,
            Framework::Nextjs,
            Framework::Django,
        ] {
            let s = f.to_string();
            let parsed: Framework = s.parse().unwrap();
            assert_eq!(f, parsed);
        }
    }

    #[test]
    fn framework_parse_is_case_insensitive() {
        assert_eq!("nodejs".parse::<Framework>().unwrap(), Framework::Nodejs);
        assert_eq!("NodeJS".parse::<Framework>().unwrap(), Framework::Nodejs);
    }

    #[test]
    fn framework_parse_rejects_unknown() {
        assert!("rails".parse::<Framework>().is_err());
    }
}
