use std::{fmt, str::FromStr};

use crate::error::{Error, ErrorKind};

/// Structured form of a text destination.
///
/// The text forms are `/exchange/<name>[/<pattern>]`, `/topic/<name>`,
/// `/queue/<name>`, `/amq/queue/<name>`, `/temp-queue/<name>`,
/// `/reply-queue/<name>` and a bare `<name>` meaning a queue. A `%2F`
/// inside a segment decodes to `/` and a `%25` to `%`; the formatter
/// encodes both back, so parsing a formatted destination returns the
/// original value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
  Exchange { name: String, routing_key: Option<String> },
  Topic { name: String },
  Queue { name: String },
  AmqQueue { name: String },
  TempQueue { name: String },
  ReplyQueue { name: String },
}

impl FromStr for Destination {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Error> {
    let invalid = || Error::from(ErrorKind::InvalidDestination(s.to_string()));
    if !s.starts_with('/') {
      if s.is_empty() {
        return Err(invalid());
      }
      return Ok(Destination::Queue { name: decode_segment(s) });
    }
    let segments: Vec<&str> = s[1..].split('/').collect();
    match segments.as_slice() {
      ["exchange", name] if !name.is_empty() => Ok(Destination::Exchange {
        name:        decode_segment(name),
        routing_key: None,
      }),
      ["exchange", name, pattern] if !name.is_empty() => Ok(Destination::Exchange {
        name:        decode_segment(name),
        routing_key: Some(decode_segment(pattern)),
      }),
      ["topic", name] if !name.is_empty()       => Ok(Destination::Topic { name: decode_segment(name) }),
      ["queue", name] if !name.is_empty()       => Ok(Destination::Queue { name: decode_segment(name) }),
      ["amq", "queue", name] if !name.is_empty() => Ok(Destination::AmqQueue { name: decode_segment(name) }),
      ["temp-queue", name] if !name.is_empty()  => Ok(Destination::TempQueue { name: decode_segment(name) }),
      ["reply-queue", name] if !name.is_empty() => Ok(Destination::ReplyQueue { name: decode_segment(name) }),
      _ => Err(invalid()),
    }
  }
}

impl fmt::Display for Destination {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Destination::Exchange { name, routing_key: None } => write!(f, "/exchange/{}", encode_segment(name)),
      Destination::Exchange { name, routing_key: Some(routing_key) } => {
        write!(f, "/exchange/{}/{}", encode_segment(name), encode_segment(routing_key))
      }
      Destination::Topic { name }      => write!(f, "/topic/{}", encode_segment(name)),
      Destination::Queue { name }      => write!(f, "/queue/{}", encode_segment(name)),
      Destination::AmqQueue { name }   => write!(f, "/amq/queue/{}", encode_segment(name)),
      Destination::TempQueue { name }  => write!(f, "/temp-queue/{}", encode_segment(name)),
      Destination::ReplyQueue { name } => write!(f, "/reply-queue/{}", encode_segment(name)),
    }
  }
}

fn decode_segment(segment: &str) -> String {
  let mut out = String::with_capacity(segment.len());
  let mut rest = segment;
  while let Some(idx) = rest.find('%') {
    out.push_str(&rest[..idx]);
    let candidate = rest.get(idx + 1..idx + 3);
    if candidate.map(|c| c.eq_ignore_ascii_case("2f")).unwrap_or(false) {
      out.push('/');
      rest = &rest[idx + 3..];
    } else if candidate.map(|c| c == "25").unwrap_or(false) {
      out.push('%');
      rest = &rest[idx + 3..];
    } else {
      out.push('%');
      rest = &rest[idx + 1..];
    }
  }
  out.push_str(rest);
  out
}

fn encode_segment(segment: &str) -> String {
  // escape the escape character first
  segment.replace('%', "%25").replace('/', "%2F")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_every_form() {
    assert_eq!(
      "/exchange/logs".parse::<Destination>().unwrap(),
      Destination::Exchange { name: "logs".to_string(), routing_key: None }
    );
    assert_eq!(
      "/exchange/logs/audit.*".parse::<Destination>().unwrap(),
      Destination::Exchange {
        name:        "logs".to_string(),
        routing_key: Some("audit.*".to_string()),
      }
    );
    assert_eq!(
      "/topic/events".parse::<Destination>().unwrap(),
      Destination::Topic { name: "events".to_string() }
    );
    assert_eq!(
      "/queue/tasks".parse::<Destination>().unwrap(),
      Destination::Queue { name: "tasks".to_string() }
    );
    assert_eq!(
      "/amq/queue/tasks".parse::<Destination>().unwrap(),
      Destination::AmqQueue { name: "tasks".to_string() }
    );
    assert_eq!(
      "/temp-queue/tmp".parse::<Destination>().unwrap(),
      Destination::TempQueue { name: "tmp".to_string() }
    );
    assert_eq!(
      "/reply-queue/replies".parse::<Destination>().unwrap(),
      Destination::ReplyQueue { name: "replies".to_string() }
    );
    assert_eq!(
      "bare".parse::<Destination>().unwrap(),
      Destination::Queue { name: "bare".to_string() }
    );
  }

  #[test]
  fn percent_escapes_decode() {
    assert_eq!(
      "/queue/a%2Fb".parse::<Destination>().unwrap(),
      Destination::Queue { name: "a/b".to_string() }
    );
    assert_eq!(
      "/queue/a%2fb".parse::<Destination>().unwrap(),
      Destination::Queue { name: "a/b".to_string() }
    );
    assert_eq!(
      "/queue/50%25".parse::<Destination>().unwrap(),
      Destination::Queue { name: "50%".to_string() }
    );
    // an escaped escape stays escaped text
    assert_eq!(
      "/queue/a%252Fb".parse::<Destination>().unwrap(),
      Destination::Queue { name: "a%2Fb".to_string() }
    );
    // stray percent signs stay as-is
    assert_eq!(
      "/queue/100%".parse::<Destination>().unwrap(),
      Destination::Queue { name: "100%".to_string() }
    );
  }

  #[test]
  fn rejects_malformed_destinations() {
    assert!("".parse::<Destination>().is_err());
    assert!("/".parse::<Destination>().is_err());
    assert!("/exchange".parse::<Destination>().is_err());
    assert!("/exchange/".parse::<Destination>().is_err());
    assert!("/nope/x".parse::<Destination>().is_err());
    assert!("/amq/nope/x".parse::<Destination>().is_err());
  }

  #[test]
  fn formatting_round_trips() {
    let destinations = vec![
      Destination::Exchange { name: "logs".to_string(), routing_key: None },
      Destination::Exchange {
        name:        "lo/gs".to_string(),
        routing_key: Some("a.b".to_string()),
      },
      Destination::Topic { name: "events".to_string() },
      Destination::Queue { name: "a/b".to_string() },
      Destination::Queue { name: "50%2fbar".to_string() },
      Destination::Queue { name: "100%".to_string() },
      Destination::AmqQueue { name: "tasks".to_string() },
      Destination::TempQueue { name: "tmp".to_string() },
      Destination::ReplyQueue { name: "replies".to_string() },
    ];
    for destination in destinations {
      assert_eq!(destination.to_string().parse::<Destination>().unwrap(), destination);
    }
  }
}
