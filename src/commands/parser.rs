//! Request Line Parser
//!
//! Turns one text line into a typed [`Command`].
//!
//! ## Tokens
//!
//! Tokens are separated by whitespace. A double quote opens a quoted run
//! that lasts until the next double quote, and whitespace inside it does not
//! split the token. Quotes may start mid-token, which is how hash fields are
//! written:
//!
//! ```text
//! HSET user:1 name:"Ariz Khan"
//! ──── ────── ────────────────
//! name  key        field
//! ```
//!
//! There are no escape sequences; a value cannot contain a double quote.
//!
//! ## TTLs
//!
//! A TTL is either plain seconds (`90`) or a sequence of `<n><unit>` parts
//! (`1h`, `1m30s`, `1.5s`, `500ms`). Units are `h`, `m`, `s`, `ms`, `us`
//! and `ns`, and numbers may carry a decimal fraction. The total is
//! truncated to whole seconds. `0` means no expiry.

use std::fmt;
use thiserror::Error;

/// Errors produced while parsing a request line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}'")]
    Unknown(String),

    #[error("wrong number of arguments for '{command}', usage: {usage}")]
    WrongArity {
        command: &'static str,
        usage: &'static str,
    },

    #[error("unterminated quote")]
    UnterminatedQuote,

    #[error("invalid value format: {0}")]
    InvalidValue(String),

    #[error("invalid hash field format: {0}")]
    InvalidHashField(String),

    #[error("invalid ttl: {0}")]
    InvalidTtl(String),

    #[error("invalid index: {0}")]
    InvalidIndex(String),
}

/// A parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Auth { user: String, password: String },
    Ping,
    Keys,
    Expire { key: String, ttl: u64 },
    Get { key: String },
    Set { key: String, value: String, ttl: u64 },
    Update { key: String, value: String },
    Delete { key: String },
    HashCreate { key: String, ttl: u64 },
    HashGet { key: String, field: String },
    HashGetAll { key: String },
    HashSet { key: String, field: String, value: String },
    HashDelete { key: String, field: String },
    HashLen { key: String },
    HashKeys { key: String },
    ListCreate { key: String, ttl: u64 },
    ListLeftPush { key: String, value: String },
    ListRightPush { key: String, value: String },
    ListLeftPop { key: String },
    ListRightPop { key: String },
    ListLen { key: String },
    ListRange { key: String, start: i64, stop: i64 },
}

/// Name, usage and accepted argument counts for every command.
struct Arity {
    name: &'static str,
    usage: &'static str,
    min: usize,
    max: usize,
}

const fn arity(name: &'static str, usage: &'static str, min: usize, max: usize) -> Arity {
    Arity {
        name,
        usage,
        min,
        max,
    }
}

impl Arity {
    fn check(&self, args: &[String]) -> Result<(), CommandError> {
        if args.len() < self.min || args.len() > self.max {
            return Err(CommandError::WrongArity {
                command: self.name,
                usage: self.usage,
            });
        }
        Ok(())
    }
}

impl Command {
    /// Parses one request line.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut tokens = tokenize(line)?.into_iter();
        let name = tokens.next().ok_or(CommandError::Empty)?;
        let args: Vec<String> = tokens.collect();
        let arg = |i: usize| args[i].clone();

        let command = match name.to_ascii_uppercase().as_str() {
            "AUTH" => {
                arity("AUTH", "AUTH user password", 2, 2).check(&args)?;
                Command::Auth {
                    user: arg(0),
                    password: unquote(&args[1])?,
                }
            }
            "PING" => {
                arity("PING", "PING", 0, 0).check(&args)?;
                Command::Ping
            }
            "KEYS" => {
                arity("KEYS", "KEYS", 0, 0).check(&args)?;
                Command::Keys
            }
            "EXPIRE" => {
                arity("EXPIRE", "EXPIRE key ttl", 2, 2).check(&args)?;
                Command::Expire {
                    key: arg(0),
                    ttl: parse_ttl(&args[1])?,
                }
            }
            "GET" => {
                arity("GET", "GET key", 1, 1).check(&args)?;
                Command::Get { key: arg(0) }
            }
            "SET" => {
                arity("SET", "SET key \"value\" [ttl]", 2, 3).check(&args)?;
                Command::Set {
                    key: arg(0),
                    value: parse_value(&args[1])?,
                    ttl: optional_ttl(args.get(2))?,
                }
            }
            "UPDATE" => {
                arity("UPDATE", "UPDATE key \"value\"", 2, 2).check(&args)?;
                Command::Update {
                    key: arg(0),
                    value: parse_value(&args[1])?,
                }
            }
            "DEL" => {
                arity("DEL", "DEL key", 1, 1).check(&args)?;
                Command::Delete { key: arg(0) }
            }
            "HCREATE" => {
                arity("HCREATE", "HCREATE key [ttl]", 1, 2).check(&args)?;
                Command::HashCreate {
                    key: arg(0),
                    ttl: optional_ttl(args.get(1))?,
                }
            }
            "HGET" => {
                arity("HGET", "HGET key field", 2, 2).check(&args)?;
                Command::HashGet {
                    key: arg(0),
                    field: arg(1),
                }
            }
            "HGETALL" => {
                arity("HGETALL", "HGETALL key", 1, 1).check(&args)?;
                Command::HashGetAll { key: arg(0) }
            }
            "HSET" => {
                arity("HSET", "HSET key field:\"value\"", 2, 2).check(&args)?;
                let (field, value) = parse_hash_field(&args[1])?;
                Command::HashSet {
                    key: arg(0),
                    field,
                    value,
                }
            }
            "HDEL" => {
                arity("HDEL", "HDEL key field", 2, 2).check(&args)?;
                Command::HashDelete {
                    key: arg(0),
                    field: arg(1),
                }
            }
            "HLEN" => {
                arity("HLEN", "HLEN key", 1, 1).check(&args)?;
                Command::HashLen { key: arg(0) }
            }
            "HKEYS" => {
                arity("HKEYS", "HKEYS key", 1, 1).check(&args)?;
                Command::HashKeys { key: arg(0) }
            }
            "LCREATE" => {
                arity("LCREATE", "LCREATE key [ttl]", 1, 2).check(&args)?;
                Command::ListCreate {
                    key: arg(0),
                    ttl: optional_ttl(args.get(1))?,
                }
            }
            "LPUSH" => {
                arity("LPUSH", "LPUSH key \"value\"", 2, 2).check(&args)?;
                Command::ListLeftPush {
                    key: arg(0),
                    value: parse_value(&args[1])?,
                }
            }
            "RPUSH" => {
                arity("RPUSH", "RPUSH key \"value\"", 2, 2).check(&args)?;
                Command::ListRightPush {
                    key: arg(0),
                    value: parse_value(&args[1])?,
                }
            }
            "LPOP" => {
                arity("LPOP", "LPOP key", 1, 1).check(&args)?;
                Command::ListLeftPop { key: arg(0) }
            }
            "RPOP" => {
                arity("RPOP", "RPOP key", 1, 1).check(&args)?;
                Command::ListRightPop { key: arg(0) }
            }
            "LLEN" => {
                arity("LLEN", "LLEN key", 1, 1).check(&args)?;
                Command::ListLen { key: arg(0) }
            }
            "LRANGE" => {
                arity("LRANGE", "LRANGE key start stop", 3, 3).check(&args)?;
                Command::ListRange {
                    key: arg(0),
                    start: parse_index(&args[1])?,
                    stop: parse_index(&args[2])?,
                }
            }
            _ => return Err(CommandError::Unknown(name)),
        };

        Ok(command)
    }

    /// Returns the command name as written on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Auth { .. } => "AUTH",
            Command::Ping => "PING",
            Command::Keys => "KEYS",
            Command::Expire { .. } => "EXPIRE",
            Command::Get { .. } => "GET",
            Command::Set { .. } => "SET",
            Command::Update { .. } => "UPDATE",
            Command::Delete { .. } => "DEL",
            Command::HashCreate { .. } => "HCREATE",
            Command::HashGet { .. } => "HGET",
            Command::HashGetAll { .. } => "HGETALL",
            Command::HashSet { .. } => "HSET",
            Command::HashDelete { .. } => "HDEL",
            Command::HashLen { .. } => "HLEN",
            Command::HashKeys { .. } => "HKEYS",
            Command::ListCreate { .. } => "LCREATE",
            Command::ListLeftPush { .. } => "LPUSH",
            Command::ListRightPush { .. } => "RPUSH",
            Command::ListLeftPop { .. } => "LPOP",
            Command::ListRightPop { .. } => "RPOP",
            Command::ListLen { .. } => "LLEN",
            Command::ListRange { .. } => "LRANGE",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Splits a line into whitespace-separated tokens, keeping quoted runs
/// (quotes included) inside one token.
fn tokenize(line: &str) -> Result<Vec<String>, CommandError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if in_quotes {
        return Err(CommandError::UnterminatedQuote);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Strips the surrounding quotes from `"..."`.
fn parse_value(token: &str) -> Result<String, CommandError> {
    token
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .filter(|inner| !inner.contains('"'))
        .map(str::to_string)
        .ok_or_else(|| CommandError::InvalidValue(token.to_string()))
}

/// Accepts a bare token or a quoted one.
fn unquote(token: &str) -> Result<String, CommandError> {
    if token.starts_with('"') {
        parse_value(token)
    } else {
        Ok(token.to_string())
    }
}

/// Splits `field:"value"` into its parts.
fn parse_hash_field(token: &str) -> Result<(String, String), CommandError> {
    let invalid = || CommandError::InvalidHashField(token.to_string());

    let (field, value) = token.split_once(':').ok_or_else(invalid)?;
    if field.is_empty()
        || !field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(invalid());
    }
    let value = parse_value(value).map_err(|_| invalid())?;
    Ok((field.to_string(), value))
}

fn optional_ttl(token: Option<&String>) -> Result<u64, CommandError> {
    token.map_or(Ok(0), |t| parse_ttl(t))
}

/// Nanoseconds per TTL unit.
fn unit_nanos(unit: &str) -> Option<u64> {
    let nanos = match unit {
        "ns" => 1,
        "us" | "\u{b5}s" | "\u{3bc}s" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60_000_000_000,
        "h" => 3_600_000_000_000,
        _ => return None,
    };
    Some(nanos)
}

/// Scales a decimal such as `1.5` by `unit` nanoseconds, dropping digits
/// below one nanosecond.
fn scaled_nanos(number: &str, unit: u64) -> Option<u64> {
    let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut nanos = whole.checked_mul(unit)?;
    let mut scale = unit;
    for digit in frac.bytes() {
        scale /= 10;
        nanos = nanos.checked_add(u64::from(digit - b'0') * scale)?;
    }
    Some(nanos)
}

/// Parses a TTL into whole seconds.
///
/// Fractions of a second are truncated, except that a non-zero TTL shorter
/// than one second becomes one second rather than "no expiry".
pub fn parse_ttl(token: &str) -> Result<u64, CommandError> {
    let invalid = || CommandError::InvalidTtl(token.to_string());

    if token.is_empty() {
        return Err(invalid());
    }
    if token.bytes().all(|b| b.is_ascii_digit()) {
        return token.parse().map_err(|_| invalid());
    }

    let mut total: u64 = 0;
    let mut rest = token;
    while !rest.is_empty() {
        let split = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(split);
        let split = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(split);

        // A number without a unit, or a unit without a number, lands here
        let unit = unit_nanos(unit).ok_or_else(invalid)?;
        total = scaled_nanos(number, unit)
            .and_then(|nanos| total.checked_add(nanos))
            .ok_or_else(invalid)?;
        rest = tail;
    }

    let secs = total / 1_000_000_000;
    Ok(if secs == 0 && total > 0 { 1 } else { secs })
}

fn parse_index(token: &str) -> Result<i64, CommandError> {
    token
        .parse()
        .map_err(|_| CommandError::InvalidIndex(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Command {
        Command::parse(line).unwrap()
    }

    #[test]
    fn test_tokenize_quoted_runs() {
        assert_eq!(
            tokenize(r#"SET greeting "hello world" 10"#).unwrap(),
            vec!["SET", "greeting", "\"hello world\"", "10"]
        );
        assert_eq!(
            tokenize(r#"  HSET  h  name:"a b"  "#).unwrap(),
            vec!["HSET", "h", "name:\"a b\""]
        );
        assert!(tokenize("").unwrap().is_empty());
        assert_eq!(
            tokenize(r#"SET k "open"#),
            Err(CommandError::UnterminatedQuote)
        );
    }

    #[test]
    fn test_parse_string_commands() {
        assert_eq!(parse("ping"), Command::Ping);
        assert_eq!(parse("KEYS"), Command::Keys);
        assert_eq!(
            parse(r#"set name "Ariz""#),
            Command::Set {
                key: "name".into(),
                value: "Ariz".into(),
                ttl: 0
            }
        );
        assert_eq!(
            parse(r#"SET name "" 1m30s"#),
            Command::Set {
                key: "name".into(),
                value: "".into(),
                ttl: 90
            }
        );
        assert_eq!(
            parse(r#"UPDATE name "new value""#),
            Command::Update {
                key: "name".into(),
                value: "new value".into()
            }
        );
        assert_eq!(
            parse("EXPIRE name 1h"),
            Command::Expire {
                key: "name".into(),
                ttl: 3600
            }
        );
        assert_eq!(parse("DEL name"), Command::Delete { key: "name".into() });
    }

    #[test]
    fn test_parse_auth() {
        assert_eq!(
            parse("AUTH ariz s3cret"),
            Command::Auth {
                user: "ariz".into(),
                password: "s3cret".into()
            }
        );
        assert_eq!(
            parse(r#"auth ariz "with space""#),
            Command::Auth {
                user: "ariz".into(),
                password: "with space".into()
            }
        );
        assert!(matches!(
            Command::parse("AUTH ariz"),
            Err(CommandError::WrongArity { command: "AUTH", .. })
        ));
    }

    #[test]
    fn test_parse_hash_commands() {
        assert_eq!(
            parse("HCREATE h 30"),
            Command::HashCreate {
                key: "h".into(),
                ttl: 30
            }
        );
        assert_eq!(
            parse(r#"HSET h first_name:"Ariz K""#),
            Command::HashSet {
                key: "h".into(),
                field: "first_name".into(),
                value: "Ariz K".into()
            }
        );
        assert_eq!(
            parse("HGET h f"),
            Command::HashGet {
                key: "h".into(),
                field: "f".into()
            }
        );
        assert_eq!(parse("hkeys h"), Command::HashKeys { key: "h".into() });
    }

    #[test]
    fn test_parse_list_commands() {
        assert_eq!(
            parse("LCREATE l"),
            Command::ListCreate {
                key: "l".into(),
                ttl: 0
            }
        );
        assert_eq!(
            parse(r#"LPUSH l "a""#),
            Command::ListLeftPush {
                key: "l".into(),
                value: "a".into()
            }
        );
        assert_eq!(
            parse("LRANGE l -1 10"),
            Command::ListRange {
                key: "l".into(),
                start: -1,
                stop: 10
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Command::parse("   "), Err(CommandError::Empty));
        assert_eq!(
            Command::parse("FLUSHALL"),
            Err(CommandError::Unknown("FLUSHALL".into()))
        );
        assert!(matches!(
            Command::parse("GET"),
            Err(CommandError::WrongArity { command: "GET", .. })
        ));
        assert!(matches!(
            Command::parse(r#"SET k "v" 10 extra"#),
            Err(CommandError::WrongArity { command: "SET", .. })
        ));
        assert_eq!(
            Command::parse("SET k unquoted"),
            Err(CommandError::InvalidValue("unquoted".into()))
        );
        assert_eq!(
            Command::parse(r#"HSET h bad-field:"v""#),
            Err(CommandError::InvalidHashField("bad-field:\"v\"".into()))
        );
        assert_eq!(
            Command::parse("HSET h field:v"),
            Err(CommandError::InvalidHashField("field:v".into()))
        );
        assert_eq!(
            Command::parse("LRANGE l a 1"),
            Err(CommandError::InvalidIndex("a".into()))
        );
    }

    #[test]
    fn test_parse_ttl() {
        assert_eq!(parse_ttl("0"), Ok(0));
        assert_eq!(parse_ttl("90"), Ok(90));
        assert_eq!(parse_ttl("10s"), Ok(10));
        assert_eq!(parse_ttl("2m"), Ok(120));
        assert_eq!(parse_ttl("1h1m1s"), Ok(3661));

        for bad in [
            "",
            "-5",
            "5x",
            "m",
            ".s",
            "1..5s",
            "1m30",
            "99999999999999999999",
            "9999999h",
        ] {
            assert!(parse_ttl(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_parse_ttl_sub_second_units() {
        assert_eq!(parse_ttl("1500ms"), Ok(1));
        assert_eq!(parse_ttl("2999ms"), Ok(2));
        assert_eq!(parse_ttl("1.5s"), Ok(1));
        assert_eq!(parse_ttl("1.5h"), Ok(5400));
        assert_eq!(parse_ttl(".5m"), Ok(30));
        assert_eq!(parse_ttl("1m500ms"), Ok(60));
        assert_eq!(parse_ttl("90000000000ns"), Ok(90));
        assert_eq!(parse_ttl("2000000us"), Ok(2));

        // Short but non-zero TTLs still expire
        assert_eq!(parse_ttl("500ms"), Ok(1));
        assert_eq!(parse_ttl("1ns"), Ok(1));
        assert_eq!(parse_ttl("0ms"), Ok(0));
        assert_eq!(parse_ttl("0s"), Ok(0));
    }
}
