/// Maps logical destination names to broker paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationResolver {
    pub app_prefix: String,
    pub topic_prefix: String,
    pub user_prefix: String,
}

/// Logical names starting with this go to the member's personal queue.
pub const PERSONAL_PREFIX: &str = "user/";

impl Default for DestinationResolver {
    fn default() -> Self {
        Self {
            app_prefix: "/app".into(),
            topic_prefix: "/topic".into(),
            user_prefix: "/user/queue".into(),
        }
    }
}

impl DestinationResolver {
    pub fn publish(&self, name: &str) -> String {
        self.resolve(name, &self.app_prefix)
    }

    pub fn subscribe(&self, name: &str) -> String {
        self.resolve(name, &self.topic_prefix)
    }

    fn resolve(&self, name: &str, prefix: &str) -> String {
        if name.starts_with('/') {
            return name.to_string();
        }
        if let Some(rest) = name.strip_prefix(PERSONAL_PREFIX) {
            return join(&self.user_prefix, rest);
        }
        join(prefix, name)
    }
}

fn join(prefix: &str, name: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_paths_pass_through() {
        let r = DestinationResolver::default();
        assert_eq!(r.publish("/queue/raw"), "/queue/raw");
        assert_eq!(r.subscribe("/topic/already"), "/topic/already");
    }

    #[test]
    fn direction_picks_prefix() {
        let r = DestinationResolver::default();
        assert_eq!(r.publish("newMessage/4"), "/app/newMessage/4");
        assert_eq!(r.subscribe("newMessage/4"), "/topic/newMessage/4");
    }

    #[test]
    fn personal_queue_is_fixed_for_both_directions() {
        let r = DestinationResolver::default();
        assert_eq!(r.subscribe("user/notifications"), "/user/queue/notifications");
        assert_eq!(r.publish("user/notifications"), "/user/queue/notifications");
    }

    #[test]
    fn custom_prefix_with_trailing_slash() {
        let r = DestinationResolver {
            app_prefix: "/pub/".into(),
            ..Default::default()
        };
        assert_eq!(r.publish("read/room/1/5"), "/pub/read/room/1/5");
    }
}
