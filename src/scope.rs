use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Pull,
    Push,
}

impl TryFrom<&str> for Action {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "push" => Ok(Action::Push),
            "pull" => Ok(Action::Pull),
            _ => Err(format!("Invalid variant: {}", value)),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Pull => write!(f, "pull"),
        }
    }
}

/// What a registry token is requested for.
///
/// Renders as `repository:<repo>[/<image>]:<actions>`, actions joined with a
/// comma in the order they were given.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scope {
    pub repository: String,
    pub image: Option<String>,
    pub actions: Vec<Action>,
}

impl Scope {
    pub fn new(repository: &str, image: Option<&str>, actions: &[Action]) -> Self {
        Self {
            repository: repository.to_string(),
            image: image.filter(|image| !image.is_empty()).map(str::to_string),
            actions: actions.to_vec(),
        }
    }

    pub fn pull(repository: &str, image: Option<&str>) -> Self {
        Self::new(repository, image, &[Action::Pull])
    }

    pub fn push_pull(repository: &str, image: Option<&str>) -> Self {
        Self::new(repository, image, &[Action::Push, Action::Pull])
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let actions = self
            .actions
            .iter()
            .map(|action| action.to_string())
            .collect::<Vec<_>>()
            .join(",");

        match &self.image {
            Some(image) => write!(f, "repository:{}/{}:{}", self.repository, image, actions),
            None => write!(f, "repository:{}:{}", self.repository, actions),
        }
    }
}
