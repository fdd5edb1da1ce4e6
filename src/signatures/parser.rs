//! Rule line parser
//!
//! Parses the textual rule grammar with nom:
//! `action protocol src_ip src_port direction dst_ip dst_port (options)`
//! where options are a `;`-separated list of `key:value` items (values
//! may be double-quoted) and bare boolean flags.

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_till, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{map, map_res, value},
    sequence::delimited,
    IResult,
};
use std::net::IpAddr;

use super::ast::*;

/// Rule syntax error, reported per offending line.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rule syntax error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parse a complete rule from one line.
pub fn parse_rule(input: &str) -> Result<Rule, ParseError> {
    let input = input.trim();

    if input.is_empty() || input.starts_with('#') {
        return Err(ParseError::new("empty or comment line"));
    }

    let open = input
        .find('(')
        .ok_or_else(|| ParseError::new("missing option parenthesis"))?;
    if !input.ends_with(')') {
        return Err(ParseError::new("unbalanced option parenthesis"));
    }

    let header = &input[..open];
    let token_count = header.split_whitespace().count();
    if token_count != 7 {
        return Err(ParseError::new(format!(
            "header has {} fields, expected 7",
            token_count
        )));
    }

    let (_, (action, protocol, src_ip, src_port, direction, dst_ip, dst_port)) =
        parse_header(header)
            .map_err(|e| ParseError::new(format!("invalid header: {:?}", e)))?;

    let (rest, options) = parse_options(&input[open..])
        .map_err(|e| ParseError::new(format!("invalid options: {:?}", e)))?;
    if !rest.trim().is_empty() {
        return Err(ParseError::new(format!(
            "unexpected trailing content: {}",
            rest
        )));
    }

    let sid = match find_text(&options, "sid") {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| ParseError::new(format!("malformed sid: {}", raw)))?,
        None => return Err(ParseError::new("missing sid option")),
    };

    let rev = match find_text(&options, "rev") {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| ParseError::new(format!("malformed rev: {}", raw)))?,
        None => 1,
    };

    let msg = find_text(&options, "msg").unwrap_or_default().to_string();
    let classtype = find_text(&options, "classtype").map(str::to_string);

    Ok(Rule {
        action,
        protocol,
        src_ip,
        src_port,
        direction,
        dst_ip,
        dst_port,
        options,
        sid,
        rev,
        msg,
        classtype,
    })
}

fn find_text<'a>(options: &'a [RuleOption], key: &str) -> Option<&'a str> {
    options.iter().find(|o| o.key == key).and_then(|o| match &o.value {
        OptionValue::Text(text) => Some(text.as_str()),
        OptionValue::Flag => None,
    })
}

type Header = (
    Action,
    Protocol,
    IpSpec,
    PortSpec,
    RuleDirection,
    IpSpec,
    PortSpec,
);

fn parse_header(input: &str) -> IResult<&str, Header> {
    let (input, _) = multispace0(input)?;
    let (input, action) = parse_action(input)?;
    let (input, _) = multispace1(input)?;
    let (input, protocol) = parse_protocol(input)?;
    let (input, _) = multispace1(input)?;
    let (input, src_ip) = parse_ip_spec(input)?;
    let (input, _) = multispace1(input)?;
    let (input, src_port) = parse_port_spec(input)?;
    let (input, _) = multispace1(input)?;
    let (input, direction) = parse_direction(input)?;
    let (input, _) = multispace1(input)?;
    let (input, dst_ip) = parse_ip_spec(input)?;
    let (input, _) = multispace1(input)?;
    let (input, dst_port) = parse_port_spec(input)?;
    let (input, _) = multispace0(input)?;

    Ok((
        input,
        (action, protocol, src_ip, src_port, direction, dst_ip, dst_port),
    ))
}

fn parse_action(input: &str) -> IResult<&str, Action> {
    alt((
        value(Action::Alert, tag_no_case("alert")),
        value(Action::Drop, tag_no_case("drop")),
        value(Action::Reject, tag_no_case("reject")),
        value(Action::Pass, tag_no_case("pass")),
    ))(input)
}

fn parse_protocol(input: &str) -> IResult<&str, Protocol> {
    alt((
        value(Protocol::Tcp, tag_no_case("tcp")),
        value(Protocol::Udp, tag_no_case("udp")),
        value(Protocol::Icmp, tag_no_case("icmp")),
        value(Protocol::Http, tag_no_case("http")),
        value(Protocol::Dns, tag_no_case("dns")),
        value(Protocol::Ip, tag_no_case("ip")),
        value(Protocol::Any, tag_no_case("any")),
    ))(input)
}

fn parse_direction(input: &str) -> IResult<&str, RuleDirection> {
    alt((
        value(RuleDirection::Both, tag("<>")),
        value(RuleDirection::ToDst, tag("->")),
    ))(input)
}

fn parse_ip_spec(input: &str) -> IResult<&str, IpSpec> {
    alt((
        value(IpSpec::Any, tag_no_case("any")),
        map_res(
            take_while1(|c: char| c.is_ascii_hexdigit() || c == '.' || c == ':'),
            |s: &str| s.parse::<IpAddr>().map(IpSpec::Addr),
        ),
    ))(input)
}

fn parse_port_spec(input: &str) -> IResult<&str, PortSpec> {
    alt((
        value(PortSpec::Any, tag_no_case("any")),
        map_res(digit1, |s: &str| s.parse::<u16>().map(PortSpec::Port)),
    ))(input)
}

/// Parse the parenthesized option list.
fn parse_options(input: &str) -> IResult<&str, Vec<RuleOption>> {
    let (mut input, _) = char('(')(input)?;
    let mut options = Vec::new();

    loop {
        let (rest, _) = multispace0(input)?;
        input = rest;

        if let Ok((rest, _)) = char::<&str, nom::error::Error<&str>>(')')(input) {
            return Ok((rest, options));
        }

        let (rest, option) = parse_option(input)?;
        options.push(option);
        input = rest;

        let (rest, _) = multispace0(input)?;
        input = rest;

        // Separator is optional before the closing parenthesis
        if let Ok((rest, _)) = char::<&str, nom::error::Error<&str>>(';')(input) {
            input = rest;
        }
    }
}

fn parse_option(input: &str) -> IResult<&str, RuleOption> {
    let (input, key) = take_while1(|c: char| {
        c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'
    })(input)?;
    let (input, _) = multispace0(input)?;

    if let Ok((rest, _)) = char::<&str, nom::error::Error<&str>>(':')(input) {
        let (rest, _) = multispace0(rest)?;
        let (rest, text) = parse_option_value(rest)?;
        Ok((
            rest,
            RuleOption {
                key: key.to_string(),
                value: OptionValue::Text(text),
            },
        ))
    } else {
        Ok((
            input,
            RuleOption {
                key: key.to_string(),
                value: OptionValue::Flag,
            },
        ))
    }
}

fn parse_option_value(input: &str) -> IResult<&str, String> {
    alt((
        map(
            delimited(char('"'), take_till(|c| c == '"'), char('"')),
            |s: &str| s.to_string(),
        ),
        map(take_till(|c| c == ';' || c == ')'), |s: &str| {
            s.trim().to_string()
        }),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_parse_basic_rule() {
        let rule = parse_rule(
            r#"alert http any any -> any any (msg:"Possible SQL Injection"; content:"UNION SELECT"; sid:1000001; rev:1;)"#,
        )
        .unwrap();

        assert_eq!(rule.action, Action::Alert);
        assert_eq!(rule.protocol, Protocol::Http);
        assert_eq!(rule.src_ip, IpSpec::Any);
        assert_eq!(rule.dst_port, PortSpec::Any);
        assert_eq!(rule.direction, RuleDirection::ToDst);
        assert_eq!(rule.msg, "Possible SQL Injection");
        assert_eq!(rule.option_text("content"), Some("UNION SELECT"));
        assert_eq!(rule.sid, 1000001);
        assert_eq!(rule.rev, 1);
    }

    #[test]
    fn test_parse_literal_addresses_and_ports() {
        let rule = parse_rule(
            "alert tcp 192.168.1.5 1024 -> 10.0.0.1 80 (msg:\"t\"; sid:2;)",
        )
        .unwrap();

        assert_eq!(
            rule.src_ip,
            IpSpec::Addr(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5)))
        );
        assert_eq!(rule.src_port, PortSpec::Port(1024));
        assert_eq!(
            rule.dst_ip,
            IpSpec::Addr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
        );
        assert_eq!(rule.dst_port, PortSpec::Port(80));
    }

    #[test]
    fn test_parse_flags_and_unknown_options() {
        let rule = parse_rule(
            r#"alert tcp any any -> any any (msg:"x"; content:"abc"; nocase; fast_pattern; sid:3;)"#,
        )
        .unwrap();

        assert!(rule.has_flag("nocase"));
        // Unknown options are retained
        assert!(rule.has_flag("fast_pattern"));
    }

    #[test]
    fn test_parse_threshold_value_with_commas() {
        let rule = parse_rule(
            "alert tcp any any -> any any (msg:\"t\"; threshold: type limit, track by_src, count 1, seconds 60; sid:42;)",
        )
        .unwrap();

        assert_eq!(
            rule.option_text("threshold"),
            Some("type limit, track by_src, count 1, seconds 60")
        );
    }

    #[test]
    fn test_parse_bidirectional() {
        let rule = parse_rule("alert udp any any <> any 53 (msg:\"d\"; sid:4;)").unwrap();
        assert_eq!(rule.direction, RuleDirection::Both);
    }

    #[test]
    fn test_header_token_count_enforced() {
        let err = parse_rule("alert tcp any any -> any (msg:\"m\"; sid:5;)").unwrap_err();
        assert!(err.message.contains("expected 7"));
    }

    #[test]
    fn test_missing_parenthesis() {
        let err = parse_rule("alert tcp any any -> any any msg:\"m\"; sid:6;").unwrap_err();
        assert!(err.message.contains("parenthesis"));

        let err = parse_rule("alert tcp any any -> any any (msg:\"m\"; sid:6;").unwrap_err();
        assert!(err.message.contains("parenthesis"));
    }

    #[test]
    fn test_missing_or_malformed_sid() {
        assert!(parse_rule("alert tcp any any -> any any (msg:\"m\";)").is_err());
        assert!(parse_rule("alert tcp any any -> any any (msg:\"m\"; sid:abc;)").is_err());
    }

    #[test]
    fn test_comments_and_blank_lines_rejected() {
        assert!(parse_rule("").is_err());
        assert!(parse_rule("# a comment").is_err());
    }

    #[test]
    fn test_canonical_form_is_idempotent() {
        let lines = [
            r#"alert http any any -> any any (msg:"Possible SQL Injection"; content:"UNION SELECT"; sid:1000001; rev:1;)"#,
            r#"alert tcp 10.1.2.3 any -> any 22 (msg:"ssh probe"; flow:established; classtype:attempted-recon; sid:77;)"#,
            r#"alert udp any any <> any 53 (msg:"dns"; nocase; sid:9; rev:3;)"#,
        ];

        for line in lines {
            let rule = parse_rule(line).unwrap();
            let reparsed = parse_rule(&rule.to_string()).unwrap();
            assert_eq!(rule, reparsed, "canonical form of {} not stable", line);
        }
    }
}
