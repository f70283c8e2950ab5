use std::time::Duration;

use anyhow::{Context, bail};

use teamlink_gateway::ConnectOptions;
use teamlink_types::models::{MemberSeq, RoomSeq};

/// Everything the binary reads from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub ws_url: String,
    pub api_url: String,
    pub token: String,
    pub member_seq: MemberSeq,
    pub member_name: String,
    pub room_seq: RoomSeq,
    pub room_name: String,
    pub joined_rooms: Vec<RoomSeq>,
    pub reconnect: Duration,
    pub heartbeat: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let required = |key: &str| match get(key) {
            Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
            _ => bail!("{} is not set", key),
        };

        let token = required("TEAMLINK_TOKEN")?;
        let member_seq: MemberSeq = required("TEAMLINK_MEMBER_SEQ")?
            .parse()
            .context("TEAMLINK_MEMBER_SEQ")?;
        let room_seq: RoomSeq = required("TEAMLINK_ROOM_SEQ")?
            .parse()
            .context("TEAMLINK_ROOM_SEQ")?;

        let ws_url = get("TEAMLINK_WS_URL").unwrap_or_else(|| "ws://localhost:8080/ws".into());
        let api_url = get("TEAMLINK_API_URL").unwrap_or_else(|| "http://localhost:8080".into());
        let member_name = get("TEAMLINK_MEMBER_NAME").unwrap_or_else(|| format!("member-{}", member_seq));
        let room_name = get("TEAMLINK_ROOM_NAME").unwrap_or_else(|| format!("room-{}", room_seq));

        let mut joined_rooms = match get("TEAMLINK_JOINED_ROOMS") {
            Some(list) => parse_rooms(&list)?,
            None => Vec::new(),
        };
        if !joined_rooms.contains(&room_seq) {
            joined_rooms.push(room_seq);
        }

        let reconnect = seconds(get("TEAMLINK_RECONNECT_SECS"), 5).context("TEAMLINK_RECONNECT_SECS")?;
        let heartbeat = seconds(get("TEAMLINK_HEARTBEAT_SECS"), 10).context("TEAMLINK_HEARTBEAT_SECS")?;

        Ok(Self {
            ws_url,
            api_url,
            token,
            member_seq,
            member_name,
            room_seq,
            room_name,
            joined_rooms,
            reconnect,
            heartbeat,
        })
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            heartbeat_outgoing: self.heartbeat,
            heartbeat_incoming: self.heartbeat,
            reconnect_delay: self.reconnect,
            ..Default::default()
        }
    }
}

/// Comma separated room ids; blanks are skipped.
fn parse_rooms(list: &str) -> anyhow::Result<Vec<RoomSeq>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<RoomSeq>().with_context(|| format!("bad room id {:?}", s)))
        .collect()
}

fn seconds(value: Option<String>, default: u64) -> anyhow::Result<Duration> {
    let secs = match value {
        Some(v) => v.trim().parse()?,
        None => default,
    };
    Ok(Duration::from_secs(secs))
}
