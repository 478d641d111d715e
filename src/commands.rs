use crate::error::{BeaconError, BeaconResult};
use chrono::NaiveDate;

pub const DEFAULT_CLEANUP_DAYS: u32 = 30;

pub const HELP_TEXT: &str = "Available commands:
/status - show tracking status
/start - start location tracking
/stop - stop location tracking
/restart - restart location tracking
/interval <ms> - set the update interval
/token <token> - set the bot token
/chatid <id> - set the chat id
/report [YYYY-MM-DD] - send the report of a day
/today - send today's report
/yesterday - send yesterday's report
/files - list stored day files
/cleanup [days] - delete day files older than N days (default 30)
/daily on [hour] | off - toggle the daily report
/retention <days> - days kept by the automatic cleanup (0 = off)
/help - show this message";

/// One operator command, arguments still unparsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Interval(Option<String>),
    Status,
    Start,
    Stop,
    Restart,
    Token(Option<String>),
    ChatId(Option<String>),
    Report(Option<String>),
    Today,
    Yesterday,
    Files,
    Cleanup(Option<String>),
    Daily(Option<String>),
    Retention(Option<String>),
    Help,
}

impl Command {
    /// `None` unless `text` starts with `/`. Unknown names map to `Help`.
    pub fn parse(text: &str) -> Option<Command> {
        let body = text.trim_start().strip_prefix('/')?;

        let (head, rest) = match body.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (body, ""),
        };
        // "/status@my_bot" addresses the command to a specific bot
        let name = head.split('@').next().unwrap_or(head).to_lowercase();
        let arg = (!rest.is_empty()).then(|| rest.to_string());

        let command = match name.as_str() {
            "interval" => Command::Interval(arg),
            "status" => Command::Status,
            "start" => Command::Start,
            "stop" => Command::Stop,
            "restart" => Command::Restart,
            "token" => Command::Token(arg),
            "chatid" => Command::ChatId(arg),
            "report" => Command::Report(arg),
            "today" => Command::Today,
            "yesterday" => Command::Yesterday,
            "files" => Command::Files,
            "cleanup" => Command::Cleanup(arg),
            "daily" => Command::Daily(arg),
            "retention" => Command::Retention(arg),
            _ => Command::Help,
        };
        Some(command)
    }
}

fn invalid(msg: &str) -> BeaconError {
    BeaconError::InvalidArgument(msg.to_string())
}

pub fn parse_interval(arg: Option<&str>) -> BeaconResult<u64> {
    arg.and_then(|a| a.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .ok_or_else(|| invalid("Please specify a valid interval in milliseconds, e.g. /interval 30000"))
}

pub fn parse_report_date(arg: Option<&str>, today: NaiveDate) -> BeaconResult<NaiveDate> {
    match arg {
        None => Ok(today),
        Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map_err(|_| invalid("Invalid date. Please use the format YYYY-MM-DD")),
    }
}

pub fn parse_cleanup_days(arg: Option<&str>) -> BeaconResult<u32> {
    match arg {
        None => Ok(DEFAULT_CLEANUP_DAYS),
        Some(text) => text
            .parse::<u32>()
            .map_err(|_| invalid("Please specify the number of days to keep, e.g. /cleanup 30")),
    }
}

pub fn parse_retention_days(arg: Option<&str>) -> BeaconResult<u32> {
    arg.and_then(|a| a.parse::<u32>().ok())
        .ok_or_else(|| invalid("Please specify the number of days, e.g. /retention 30"))
}

pub fn parse_required(arg: Option<&str>, what: &str) -> BeaconResult<String> {
    arg.map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .ok_or_else(|| BeaconError::InvalidArgument(format!("Please specify a valid {}", what)))
}

/// `on [hour]` or `off`. Returns the new flag and the optional hour.
pub fn parse_daily(arg: Option<&str>) -> BeaconResult<(bool, Option<u32>)> {
    let usage = "Usage: /daily on [hour 0-23] or /daily off";
    let text = arg.ok_or_else(|| invalid(usage))?;
    let mut words = text.split_whitespace();

    match words.next().map(str::to_lowercase).as_deref() {
        Some("off") => Ok((false, None)),
        Some("on") => match words.next() {
            None => Ok((true, None)),
            Some(hour) => hour
                .parse::<u32>()
                .ok()
                .filter(|h| *h <= 23)
                .map(|h| (true, Some(h)))
                .ok_or_else(|| invalid(usage)),
        },
        _ => Err(invalid(usage)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requires_slash() {
        assert_eq!(Command::parse("status"), None);
        assert_eq!(Command::parse("hello /status"), None);
        assert_eq!(Command::parse("/status"), Some(Command::Status));
    }

    #[test]
    fn test_parse_is_case_insensitive_and_splits_once() {
        assert_eq!(
            Command::parse("/INTERVAL 30000"),
            Some(Command::Interval(Some("30000".into())))
        );
        assert_eq!(
            Command::parse("/token 123:abc def"),
            Some(Command::Token(Some("123:abc def".into())))
        );
        assert_eq!(Command::parse("/report"), Some(Command::Report(None)));
    }

    #[test]
    fn test_parse_strips_bot_suffix() {
        assert_eq!(Command::parse("/files@beacon_bot"), Some(Command::Files));
    }

    #[test]
    fn test_unknown_command_is_help() {
        assert_eq!(Command::parse("/dance"), Some(Command::Help));
        assert_eq!(Command::parse("/"), Some(Command::Help));
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval(Some("30000")).unwrap(), 30_000);
        assert!(parse_interval(Some("0")).is_err());
        assert!(parse_interval(Some("-5")).is_err());
        assert!(parse_interval(Some("fast")).is_err());
        assert!(parse_interval(None).is_err());
    }

    #[test]
    fn test_parse_report_date() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        assert_eq!(parse_report_date(None, today).unwrap(), today);
        assert_eq!(
            parse_report_date(Some("2025-05-31"), today).unwrap(),
            NaiveDate::from_ymd_opt(2025, 5, 31).unwrap()
        );
        assert!(parse_report_date(Some("31.05.2025"), today).is_err());
    }

    #[test]
    fn test_parse_cleanup_days() {
        assert_eq!(parse_cleanup_days(None).unwrap(), 30);
        assert_eq!(parse_cleanup_days(Some("7")).unwrap(), 7);
        assert!(parse_cleanup_days(Some("week")).is_err());
    }

    #[test]
    fn test_parse_daily() {
        assert_eq!(parse_daily(Some("off")).unwrap(), (false, None));
        assert_eq!(parse_daily(Some("ON")).unwrap(), (true, None));
        assert_eq!(parse_daily(Some("on 7")).unwrap(), (true, Some(7)));
        assert!(parse_daily(Some("on 24")).is_err());
        assert!(parse_daily(Some("maybe")).is_err());
        assert!(parse_daily(None).is_err());
    }

    #[test]
    fn test_parse_required() {
        assert_eq!(parse_required(Some(" 42 "), "chat id").unwrap(), "42");
        let err = parse_required(None, "bot token").unwrap_err();
        assert_eq!(err.user_message(), "Please specify a valid bot token");
    }
}
