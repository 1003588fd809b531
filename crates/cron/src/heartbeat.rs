//! Heartbeat: a system job that periodically prompts the agent.
//!
//! The agent answers `HEARTBEAT_OK` when nothing needs attention; such
//! replies are suppressed. Pending [`SystemEventsQueue`] entries are prepended
//! to the prompt, and the job is skipped outside the configured active hours.

use std::sync::Arc;

use {
    chrono::{DateTime, Local, NaiveTime, Timelike, Utc},
    warren_config::schema::{ActiveHoursConfig, HeartbeatConfig},
};

use crate::{
    Result,
    parse::parse_duration_ms,
    system_events::{SystemEvent, SystemEventsQueue},
    types::{CronJobCreate, CronSchedule, CronTarget},
};

/// Sentinel reply meaning "nothing to report".
pub const HEARTBEAT_OK: &str = "HEARTBEAT_OK";

/// Fixed id of the heartbeat job.
pub const HEARTBEAT_JOB_ID: &str = "heartbeat";

pub const DEFAULT_PROMPT: &str = "\
This is a periodic heartbeat. Review pending reminders, scheduled work and \
recent events and decide whether anything needs the user's attention now.\n\n\
- If nothing needs attention, reply with exactly: HEARTBEAT_OK\n\
- Otherwise describe it concisely.\n\
Do not wrap HEARTBEAT_OK in formatting.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripResult {
    /// The reply should not be delivered.
    pub should_skip: bool,
    pub text: String,
    pub did_strip: bool,
}

/// Remove `HEARTBEAT_OK` (also `**HEARTBEAT_OK**` and `<b>HEARTBEAT_OK</b>`).
///
/// A reply that carried the token and leaves at most `max_ack_chars` of other
/// text is treated as a plain acknowledgment and skipped.
pub fn strip_heartbeat_token(text: &str, max_ack_chars: usize) -> StripResult {
    let trimmed = text.trim();
    if unwrap_bold(trimmed) == HEARTBEAT_OK {
        return StripResult {
            should_skip: true,
            text: String::new(),
            did_strip: true,
        };
    }

    let mut rest = trimmed.to_string();
    let mut did_strip = false;
    for pattern in [
        format!("**{HEARTBEAT_OK}**"),
        format!("<b>{HEARTBEAT_OK}</b>"),
        HEARTBEAT_OK.to_string(),
    ] {
        if rest.contains(&pattern) {
            rest = rest.replace(&pattern, "");
            did_strip = true;
        }
    }
    let rest = rest.trim().to_string();
    let should_skip = rest.is_empty() || (did_strip && rest.chars().count() <= max_ack_chars);

    StripResult {
        should_skip,
        text: rest,
        did_strip,
    }
}

/// True when a `HEARTBEAT.md` holds only headers, blank lines and empty
/// list items.
pub fn is_heartbeat_content_empty(content: &str) -> bool {
    content.lines().all(|line| {
        let trimmed = line.trim();
        trimmed.is_empty() || trimmed.starts_with('#') || trimmed == "-" || trimmed == "*"
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptSource {
    Config,
    HeartbeatMd,
    Default,
}

/// Config prompt, then `HEARTBEAT.md`, then [`DEFAULT_PROMPT`].
pub fn resolve_heartbeat_prompt(
    custom: Option<&str>,
    heartbeat_md: Option<&str>,
) -> (String, PromptSource) {
    if let Some(p) = custom.map(str::trim)
        && !p.is_empty()
    {
        return (p.to_string(), PromptSource::Config);
    }
    if let Some(md) = heartbeat_md.map(str::trim)
        && !is_heartbeat_content_empty(md)
    {
        return (md.to_string(), PromptSource::HeartbeatMd);
    }
    (DEFAULT_PROMPT.to_string(), PromptSource::Default)
}

/// Whether `now` falls inside `[start, end)` in `timezone`.
///
/// Windows may wrap midnight (`22:00`-`06:00`). `end = "24:00"` means end of
/// day. Unparseable bounds mean always active; an unknown timezone falls back
/// to local time.
pub fn is_within_active_hours(start: &str, end: &str, timezone: &str, now: DateTime<Utc>) -> bool {
    let Some(start_minutes) = parse_hhmm(start) else {
        return true;
    };
    let Some(end_minutes) = parse_hhmm(end) else {
        return true;
    };

    let now_minutes = match timezone.parse::<chrono_tz::Tz>() {
        Ok(tz) if timezone != "local" && !timezone.is_empty() => {
            minutes_of_day(&now.with_timezone(&tz))
        },
        _ => minutes_of_day(&now.with_timezone(&Local)),
    };

    if start_minutes <= end_minutes {
        now_minutes >= start_minutes && now_minutes < end_minutes
    } else {
        now_minutes >= start_minutes || now_minutes < end_minutes
    }
}

/// Prompt with pending events prepended.
pub fn compose_prompt(base: &str, events: &[SystemEvent]) -> String {
    if events.is_empty() {
        return base.to_string();
    }
    let mut out = String::from("Recent events:\n");
    for event in events {
        out.push_str("- ");
        out.push_str(&event.text);
        out.push('\n');
    }
    out.push('\n');
    out.push_str(base);
    out
}

/// Runtime heartbeat settings shared by the job dispatcher.
pub struct Heartbeat {
    prompt: String,
    ack_max_chars: usize,
    active_hours: ActiveHoursConfig,
    events: Arc<SystemEventsQueue>,
}

impl Heartbeat {
    pub fn new(
        config: &HeartbeatConfig,
        heartbeat_md: Option<&str>,
        events: Arc<SystemEventsQueue>,
    ) -> Self {
        let (prompt, _) = resolve_heartbeat_prompt(config.prompt.as_deref(), heartbeat_md);
        Self {
            prompt,
            ack_max_chars: config.ack_max_chars,
            active_hours: config.active_hours.clone(),
            events,
        }
    }

    /// The system job for `config`, or `None` when heartbeats are off.
    pub fn job(config: &HeartbeatConfig) -> Result<Option<CronJobCreate>> {
        if !config.enabled {
            return Ok(None);
        }
        let interval_ms = parse_duration_ms(&config.every)?;
        let target = (config.channel.is_some() || config.chat_id.is_some()).then(|| CronTarget {
            channel: config.channel.clone(),
            chat_id: config.chat_id.clone(),
        });
        Ok(Some(CronJobCreate {
            id: Some(HEARTBEAT_JOB_ID.to_string()),
            target,
            system: true,
            ..CronJobCreate::new(
                "heartbeat",
                String::new(),
                CronSchedule::Interval { interval_ms },
            )
        }))
    }

    pub fn events(&self) -> &Arc<SystemEventsQueue> {
        &self.events
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        is_within_active_hours(
            &self.active_hours.start,
            &self.active_hours.end,
            &self.active_hours.timezone,
            now,
        )
    }

    /// Drains pending events into the prompt.
    pub async fn take_prompt(&self) -> String {
        let events = self.events.drain().await;
        compose_prompt(&self.prompt, &events)
    }

    /// The text to deliver, or `None` for an acknowledgment.
    pub fn filter_reply(&self, reply: &str) -> Option<String> {
        let stripped = strip_heartbeat_token(reply, self.ack_max_chars);
        (!stripped.should_skip).then_some(stripped.text)
    }
}

fn unwrap_bold(s: &str) -> &str {
    s.strip_prefix("**")
        .and_then(|s| s.strip_suffix("**"))
        .or_else(|| s.strip_prefix("<b>").and_then(|s| s.strip_suffix("</b>")))
        .unwrap_or(s)
}

fn parse_hhmm(s: &str) -> Option<u32> {
    if s == "24:00" {
        return Some(24 * 60);
    }
    NaiveTime::parse_from_str(s, "%H:%M")
        .ok()
        .map(|t| t.hour() * 60 + t.minute())
}

fn minutes_of_day<T: Timelike>(t: &T) -> u32 {
    t.hour() * 60 + t.minute()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, chrono::TimeZone, rstest::rstest};

    #[rstest]
    #[case("HEARTBEAT_OK")]
    #[case("**HEARTBEAT_OK**")]
    #[case("<b>HEARTBEAT_OK</b>")]
    #[case("  HEARTBEAT_OK  \n")]
    #[case("HEARTBEAT_OK - all quiet")]
    fn acknowledgments_are_skipped(#[case] reply: &str) {
        assert!(strip_heartbeat_token(reply, 300).should_skip, "{reply}");
    }

    #[test]
    fn long_text_after_token_is_delivered() {
        let reply = format!("HEARTBEAT_OK\n{}", "x".repeat(50));
        let r = strip_heartbeat_token(&reply, 20);
        assert!(!r.should_skip);
        assert!(r.did_strip);
        assert!(!r.text.contains(HEARTBEAT_OK));
    }

    #[test]
    fn reply_without_token_is_delivered() {
        let r = strip_heartbeat_token("You have a meeting at 3pm", 300);
        assert!(!r.should_skip);
        assert!(!r.did_strip);
        assert_eq!(r.text, "You have a meeting at 3pm");
    }

    #[test]
    fn prompt_precedence() {
        assert_eq!(resolve_heartbeat_prompt(None, None).1, PromptSource::Default);
        assert_eq!(
            resolve_heartbeat_prompt(Some("  "), Some("# Heartbeat\n- \n")).1,
            PromptSource::Default
        );
        assert_eq!(
            resolve_heartbeat_prompt(None, Some("# Heartbeat\n- check inbox")),
            ("# Heartbeat\n- check inbox".to_string(), PromptSource::HeartbeatMd)
        );
        assert_eq!(
            resolve_heartbeat_prompt(Some("custom"), Some("- check inbox")).1,
            PromptSource::Config
        );
    }

    fn at_utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, m, 0).unwrap()
    }

    #[rstest]
    #[case("08:00", "24:00", 7, 59, false)]
    #[case("08:00", "24:00", 8, 0, true)]
    #[case("08:00", "24:00", 23, 59, true)]
    #[case("09:00", "17:00", 17, 0, false)]
    #[case("22:00", "06:00", 23, 30, true)]
    #[case("22:00", "06:00", 5, 59, true)]
    #[case("22:00", "06:00", 12, 0, false)]
    #[case("bogus", "06:00", 12, 0, true)]
    fn active_hours_in_utc(
        #[case] start: &str,
        #[case] end: &str,
        #[case] h: u32,
        #[case] m: u32,
        #[case] expected: bool,
    ) {
        assert_eq!(
            is_within_active_hours(start, end, "UTC", at_utc(h, m)),
            expected
        );
    }

    #[test]
    fn active_hours_use_timezone() {
        // 07:30 UTC is 08:30 in Paris (CET).
        assert!(is_within_active_hours(
            "08:00",
            "09:00",
            "Europe/Paris",
            at_utc(7, 30)
        ));
        assert!(!is_within_active_hours("08:00", "09:00", "UTC", at_utc(7, 30)));
    }

    #[test]
    fn job_from_config() {
        let mut config = HeartbeatConfig::default();
        config.every = "15m".into();
        config.channel = Some("loopback".into());
        let job = Heartbeat::job(&config).unwrap().unwrap();
        assert_eq!(job.id.as_deref(), Some(HEARTBEAT_JOB_ID));
        assert!(job.system);
        assert_eq!(job.schedule, CronSchedule::Interval {
            interval_ms: 900_000
        });
        assert_eq!(job.target.unwrap().channel.as_deref(), Some("loopback"));

        config.enabled = false;
        assert!(Heartbeat::job(&config).unwrap().is_none());
        config.enabled = true;
        config.every = "soon".into();
        assert!(Heartbeat::job(&config).is_err());
    }

    #[tokio::test]
    async fn prompt_includes_and_drains_events() {
        let events = Arc::new(SystemEventsQueue::new());
        events.enqueue("backup finished", "cron:backup").await;
        let mut config = HeartbeatConfig::default();
        config.prompt = Some("Anything new?".into());
        let heartbeat = Heartbeat::new(&config, None, Arc::clone(&events));

        let prompt = heartbeat.take_prompt().await;
        assert!(prompt.starts_with("Recent events:\n- backup finished\n"));
        assert!(prompt.ends_with("Anything new?"));
        assert!(events.is_empty().await);
        assert_eq!(heartbeat.take_prompt().await, "Anything new?");

        assert_eq!(heartbeat.filter_reply("HEARTBEAT_OK"), None);
        assert_eq!(
            heartbeat.filter_reply("Disk is 95% full").as_deref(),
            Some("Disk is 95% full")
        );
    }
}
