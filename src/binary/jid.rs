use std::fmt;
use std::str::FromStr;

pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
pub const SERVER_JID: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";
pub const LEGACY_USER_SERVER: &str = "c.us";
pub const BROADCAST_SERVER: &str = "broadcast";
pub const HIDDEN_USER_SERVER: &str = "lid";
pub const STATUS_BROADCAST_USER: &str = "status";

pub type MessageId = String;

#[derive(Debug)]
pub enum JidError {
    InvalidFormat(String),
    Parse(std::num::ParseIntError),
}

impl fmt::Display for JidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JidError::InvalidFormat(s) => write!(f, "invalid JID format: {s}"),
            JidError::Parse(e) => write!(f, "failed to parse JID component: {e}"),
        }
    }
}

impl std::error::Error for JidError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JidError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::num::ParseIntError> for JidError {
    fn from(err: std::num::ParseIntError) -> Self {
        JidError::Parse(err)
    }
}

/// A chat endpoint identifier of the form `user[.agent][:device]@server`.
///
/// The server part distinguishes the user (`s.whatsapp.net`), group (`g.us`),
/// consumer (`c.us`), hidden (`lid`) and broadcast spaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct Jid {
    pub user: String,
    pub server: String,
    pub agent: u8,
    pub device: u16,
}

impl Jid {
    pub fn new(user: &str, server: &str) -> Self {
        Self {
            user: user.to_string(),
            server: server.to_string(),
            ..Default::default()
        }
    }

    /// A plain user JID in the default server space.
    pub fn user(user: &str) -> Self {
        Self::new(user, DEFAULT_USER_SERVER)
    }

    pub fn group(id: &str) -> Self {
        Self::new(id, GROUP_SERVER)
    }

    pub fn user_device(user: &str, device: u16) -> Self {
        Self {
            user: user.to_string(),
            server: DEFAULT_USER_SERVER.to_string(),
            agent: 0,
            device,
        }
    }

    /// The consumer-domain (`c.us`) alias of the same user.
    pub fn to_consumer(&self) -> Self {
        Self::new(&self.user, LEGACY_USER_SERVER)
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    pub fn is_user(&self) -> bool {
        self.server == DEFAULT_USER_SERVER
            || self.server == LEGACY_USER_SERVER
            || self.server == HIDDEN_USER_SERVER
    }

    pub fn is_broadcast_list(&self) -> bool {
        self.server == BROADCAST_SERVER && self.user != STATUS_BROADCAST_USER
    }

    pub fn is_status_broadcast(&self) -> bool {
        self.server == BROADCAST_SERVER && self.user == STATUS_BROADCAST_USER
    }

    /// Bare protocol server address (`s.whatsapp.net` with no user part).
    pub fn is_server(&self) -> bool {
        self.user.is_empty() && self.server == DEFAULT_USER_SERVER
    }

    pub fn is_empty(&self) -> bool {
        self.server.is_empty()
    }

    pub fn is_same_user_as(&self, other: &Jid) -> bool {
        self.user == other.user
    }

    /// Strips the agent and device parts, keeping only the account identity.
    pub fn to_non_ad(&self) -> Self {
        Self {
            user: self.user.clone(),
            server: self.server.clone(),
            agent: 0,
            device: 0,
        }
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() {
            return write!(f, "{}", self.server);
        }
        match (self.agent, self.device) {
            (0, 0) => write!(f, "{}@{}", self.user, self.server),
            (0, d) => write!(f, "{}:{}@{}", self.user, d, self.server),
            (a, 0) => write!(f, "{}.{}@{}", self.user, a, self.server),
            (a, d) => write!(f, "{}.{}:{}@{}", self.user, a, d, self.server),
        }
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user_part, server) = match s.split_once('@') {
            Some((u, srv)) => (u, srv),
            None => ("", s),
        };

        if user_part.is_empty() {
            let known = [
                DEFAULT_USER_SERVER,
                GROUP_SERVER,
                LEGACY_USER_SERVER,
                BROADCAST_SERVER,
                HIDDEN_USER_SERVER,
            ];
            if !known.contains(&server) {
                return Err(JidError::InvalidFormat(format!("unknown server '{server}'")));
            }
            return Ok(Jid::new("", server));
        }

        let (user_agent, device) = match user_part.split_once(':') {
            Some((ua, d)) => (ua, d.parse::<u16>()?),
            None => (user_part, 0),
        };

        // LID user identifiers can contain dots that are part of the identity,
        // not agent separators.
        let (user, agent) = if server == HIDDEN_USER_SERVER {
            (user_agent, 0)
        } else {
            match user_agent.rsplit_once('.') {
                Some((u, a)) => match a.parse::<u8>() {
                    Ok(agent) => (u, agent),
                    Err(_) => (user_agent, 0),
                },
                None => (user_agent, 0),
            }
        };

        Ok(Jid {
            user: user.to_string(),
            server: server.to_string(),
            agent,
            device,
        })
    }
}
