//! npm semantic-version ranges.
//!
//! Parses npm range expressions into a disjunction of comparator sets and
//! evaluates them against [`semver::Version`]s. Supported syntax:
//! - exact versions, with an optional `v` or `=` prefix: `1.2.3`, `v1.2.3`
//! - comparators: `>=1.2.3`, `<2`, `> 1.2` (whitespace after the operator is allowed)
//! - caret and tilde: `^1.2.3`, `~1.2`, `~>1.2.3`
//! - x-ranges: `1.x`, `1.2.*`, `1`, `*`, `x`, empty string, `latest`
//! - hyphen ranges: `1.2.3 - 2.3.4`, `1.2 - 2`
//! - space-separated AND and `||`-separated OR
//!
//! Upper bounds produced by desugaring use a `-0` prerelease (`<2.0.0-0`) so
//! that prereleases of the next major never leak into a range. A prerelease
//! version only satisfies a comparator set when some comparator in that set
//! names a prerelease on the same `major.minor.patch`.

use super::error::MirrorError;
use semver::{BuildMetadata, Prerelease, Version};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed range: satisfied when any comparator set is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    raw: String,
    sets: Vec<ComparatorSet>,
}

/// Comparators that must all hold. An empty set matches every release.
type ComparatorSet = Vec<Comparator>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Comparator {
    op: Op,
    version: Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

/// A version with optional components (`1`, `1.2`, `1.x`).
#[derive(Debug, Clone, PartialEq, Eq)]
struct Partial {
    major: Option<u64>,
    minor: Option<u64>,
    patch: Option<u64>,
    pre: Prerelease,
}

impl Partial {
    fn is_full(&self) -> bool {
        self.patch.is_some()
    }

    /// Missing components filled with zeros.
    fn floor(&self) -> Version {
        let mut v = Version::new(
            self.major.unwrap_or(0),
            self.minor.unwrap_or(0),
            self.patch.unwrap_or(0),
        );
        v.pre = self.pre.clone();
        v
    }
}

impl Range {
    /// Parse an npm range expression.
    ///
    /// # Errors
    /// Returns an error if any alternative of the expression is malformed.
    pub fn parse(expr: &str) -> Result<Self, MirrorError> {
        let trimmed = expr.trim();

        if trimmed == "latest" {
            return Ok(Self {
                raw: trimmed.to_string(),
                sets: vec![Vec::new()],
            });
        }

        let sets = trimmed
            .split("||")
            .map(|alt| parse_set(alt.trim()).map_err(|reason| MirrorError::range_invalid(expr, &reason)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: trimmed.to_string(),
            sets,
        })
    }

    /// The expression this range was parsed from.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `version` satisfies this range.
    #[must_use]
    pub fn satisfies(&self, version: &Version) -> bool {
        self.sets.iter().any(|set| set_satisfies(set, version))
    }

    /// The highest version in `versions` satisfying this range.
    pub fn max_satisfying<'a, I>(&self, versions: I) -> Option<&'a Version>
    where
        I: IntoIterator<Item = &'a Version>,
    {
        versions
            .into_iter()
            .filter(|v| self.satisfies(v))
            .max_by(|a, b| compare_precedence(a, b))
    }

    /// Every version in `versions` satisfying this range, highest first.
    pub fn all_satisfying<'a, I>(&self, versions: I) -> Vec<&'a Version>
    where
        I: IntoIterator<Item = &'a Version>,
    {
        let mut matching: Vec<&Version> = versions.into_iter().filter(|v| self.satisfies(v)).collect();
        matching.sort_by(|a, b| compare_precedence(b, a));
        matching
    }
}

impl FromStr for Range {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Whether `version` satisfies `range_expr`. Malformed ranges match nothing.
#[must_use]
pub fn satisfies(version: &Version, range_expr: &str) -> bool {
    Range::parse(range_expr).is_ok_and(|range| range.satisfies(version))
}

/// The highest of `versions` satisfying `range_expr`, or `None` when nothing
/// matches or the range is malformed.
pub fn max_satisfying<'a, I>(versions: I, range_expr: &str) -> Option<&'a Version>
where
    I: IntoIterator<Item = &'a Version>,
{
    Range::parse(range_expr).ok()?.max_satisfying(versions)
}

/// Full semver precedence: major, minor, patch, then prerelease identifiers.
/// Build metadata is ignored.
#[must_use]
pub fn compare_precedence(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch)
        .cmp(&(b.major, b.minor, b.patch))
        .then_with(|| match (a.pre.is_empty(), b.pre.is_empty()) {
            (true, true) => Ordering::Equal,
            // A release has higher precedence than any of its prereleases.
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => a.pre.cmp(&b.pre),
        })
}

fn set_satisfies(set: &[Comparator], version: &Version) -> bool {
    if !set.iter().all(|c| c.test(version)) {
        return false;
    }

    if version.pre.is_empty() {
        return true;
    }

    set.iter().any(|c| {
        !c.version.pre.is_empty()
            && c.version.major == version.major
            && c.version.minor == version.minor
            && c.version.patch == version.patch
    })
}

impl Comparator {
    fn new(op: Op, version: Version) -> Self {
        Self { op, version }
    }

    fn test(&self, version: &Version) -> bool {
        let ord = compare_precedence(version, &self.version);
        match self.op {
            Op::Lt => ord == Ordering::Less,
            Op::Le => ord != Ordering::Greater,
            Op::Gt => ord == Ordering::Greater,
            Op::Ge => ord != Ordering::Less,
            Op::Eq => ord == Ordering::Equal,
        }
    }
}

fn parse_set(alt: &str) -> Result<ComparatorSet, String> {
    let tokens = tokenize(alt);
    let words: Vec<&str> = tokens.iter().map(String::as_str).collect();

    if let [start, "-", end] = words.as_slice() {
        return hyphen(start, end);
    }

    let mut set = Vec::new();
    for token in words {
        set.extend(desugar(token)?);
    }
    Ok(set)
}

/// Split on whitespace, re-attaching bare operators to the version after them
/// (`>= 1.2.3` becomes `>=1.2.3`).
fn tokenize(alt: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut pending_op = String::new();

    for word in alt.split_whitespace() {
        if word != "-" && word.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            pending_op.push_str(word);
            continue;
        }
        tokens.push(format!("{pending_op}{word}"));
        pending_op.clear();
    }

    if !pending_op.is_empty() {
        tokens.push(pending_op);
    }

    tokens
}

fn hyphen(start: &str, end: &str) -> Result<ComparatorSet, String> {
    let start = parse_partial(start)?;
    let end = parse_partial(end)?;
    let mut set = Vec::new();

    if start.major.is_some() {
        set.push(Comparator::new(Op::Ge, start.floor()));
    }

    match (end.major, end.minor, end.patch) {
        (None, _, _) => {}
        (Some(major), None, _) => set.push(Comparator::new(Op::Lt, bound(bump(major)?, 0, 0))),
        (Some(major), Some(minor), None) => {
            set.push(Comparator::new(Op::Lt, bound(major, bump(minor)?, 0)));
        }
        (Some(_), Some(_), Some(_)) => set.push(Comparator::new(Op::Le, end.floor())),
    }

    Ok(set)
}

fn desugar(token: &str) -> Result<ComparatorSet, String> {
    let (op, rest) = split_operator(token);
    let partial = parse_partial(rest)?;

    let Some(major) = partial.major else {
        // `*`, `x`, `>=*`: everything. `<*`, `>*`: nothing.
        return Ok(match op {
            "<" | ">" => vec![Comparator::new(Op::Lt, bound(0, 0, 0))],
            _ => Vec::new(),
        });
    };

    let lower = Comparator::new(Op::Ge, partial.floor());

    let set = match op {
        "" | "=" => match partial.minor {
            None => vec![lower, Comparator::new(Op::Lt, bound(bump(major)?, 0, 0))],
            Some(minor) if !partial.is_full() => {
                vec![lower, Comparator::new(Op::Lt, bound(major, bump(minor)?, 0))]
            }
            Some(_) => vec![Comparator::new(Op::Eq, partial.floor())],
        },
        "~" | "~>" => match partial.minor {
            None => vec![lower, Comparator::new(Op::Lt, bound(bump(major)?, 0, 0))],
            Some(minor) => vec![lower, Comparator::new(Op::Lt, bound(major, bump(minor)?, 0))],
        },
        "^" => {
            let upper = match (partial.minor, partial.patch) {
                (None, _) => bound(bump(major)?, 0, 0),
                (Some(_), _) if major > 0 => bound(bump(major)?, 0, 0),
                (Some(minor), None) => bound(0, bump(minor)?, 0),
                (Some(minor), Some(_)) if minor > 0 => bound(0, bump(minor)?, 0),
                (Some(_), Some(patch)) => bound(0, 0, bump(patch)?),
            };
            vec![lower, Comparator::new(Op::Lt, upper)]
        }
        ">=" => vec![lower],
        ">" => match (partial.minor, partial.patch) {
            (None, _) => vec![Comparator::new(Op::Ge, Version::new(bump(major)?, 0, 0))],
            (Some(minor), None) => vec![Comparator::new(Op::Ge, Version::new(major, bump(minor)?, 0))],
            (Some(_), Some(_)) => vec![Comparator::new(Op::Gt, partial.floor())],
        },
        "<" => {
            if partial.is_full() {
                vec![Comparator::new(Op::Lt, partial.floor())]
            } else {
                vec![Comparator::new(
                    Op::Lt,
                    bound(major, partial.minor.unwrap_or(0), 0),
                )]
            }
        }
        "<=" => match (partial.minor, partial.patch) {
            (None, _) => vec![Comparator::new(Op::Lt, bound(bump(major)?, 0, 0))],
            (Some(minor), None) => vec![Comparator::new(Op::Lt, bound(major, bump(minor)?, 0))],
            (Some(_), Some(_)) => vec![Comparator::new(Op::Le, partial.floor())],
        },
        other => return Err(format!("unknown operator '{other}'")),
    };

    Ok(set)
}

/// The next value of a version component, used for exclusive upper bounds.
fn bump(component: u64) -> Result<u64, String> {
    component
        .checked_add(1)
        .ok_or_else(|| format!("version component too large: {component}"))
}

fn split_operator(token: &str) -> (&str, &str) {
    for op in ["~>", ">=", "<=", ">", "<", "=", "~", "^"] {
        if let Some(rest) = token.strip_prefix(op) {
            return (op, rest.trim_start());
        }
    }
    ("", token)
}

/// The lowest version of `major.minor.patch`, i.e. `major.minor.patch-0`.
fn bound(major: u64, minor: u64, patch: u64) -> Version {
    Version {
        major,
        minor,
        patch,
        pre: Prerelease::new("0").unwrap_or(Prerelease::EMPTY),
        build: BuildMetadata::EMPTY,
    }
}

fn parse_partial(input: &str) -> Result<Partial, String> {
    let input = input.trim();
    let input = input.strip_prefix('=').unwrap_or(input).trim_start();
    let input = input
        .strip_prefix('v')
        .or_else(|| input.strip_prefix('V'))
        .unwrap_or(input);

    if input.is_empty() {
        return Ok(Partial {
            major: None,
            minor: None,
            patch: None,
            pre: Prerelease::EMPTY,
        });
    }

    let without_build = input.split_once('+').map_or(input, |(core, _)| core);
    let (core, pre) = match without_build.split_once('-') {
        Some((core, pre)) => {
            let pre = Prerelease::new(pre).map_err(|e| format!("invalid prerelease '{pre}': {e}"))?;
            (core, pre)
        }
        None => (without_build, Prerelease::EMPTY),
    };

    let parts: Vec<&str> = core.split('.').collect();
    if parts.len() > 3 {
        return Err(format!("too many version components in '{input}'"));
    }

    let mut numbers = [None; 3];
    let mut wildcard_seen = false;
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        if matches!(*part, "x" | "X" | "*") {
            wildcard_seen = true;
            continue;
        }
        if wildcard_seen {
            // `1.x.3` is treated as `1.x`.
            continue;
        }
        let n = part
            .parse::<u64>()
            .map_err(|_| format!("invalid version component '{part}' in '{input}'"))?;
        *slot = Some(n);
    }

    let [major, minor, patch] = numbers;
    let partial = Partial {
        major,
        minor: major.and(minor),
        patch: major.and(minor).and(patch),
        pre,
    };

    if !partial.pre.is_empty() && !partial.is_full() {
        return Err(format!("prerelease on a partial version '{input}'"));
    }

    Ok(partial)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn vs(list: &[&str]) -> Vec<Version> {
        list.iter().map(|s| v(s)).collect()
    }

    fn max(list: &[&str], range: &str) -> Option<String> {
        let versions = vs(list);
        max_satisfying(&versions, range).map(ToString::to_string)
    }

    fn check(range: &str, yes: &[&str], no: &[&str]) {
        let parsed = Range::parse(range).unwrap();
        for s in yes {
            assert!(parsed.satisfies(&v(s)), "{s} should satisfy '{range}'");
        }
        for s in no {
            assert!(!parsed.satisfies(&v(s)), "{s} should not satisfy '{range}'");
        }
    }

    #[test]
    fn test_max_satisfying_caret() {
        assert_eq!(
            max(&["1.0.0", "1.2.0", "2.0.0"], "^1.0.0").as_deref(),
            Some("1.2.0")
        );
    }

    #[test]
    fn test_max_satisfying_no_match() {
        assert_eq!(max(&["1.0.0"], "^2.0.0"), None);
        assert_eq!(max(&[], "*"), None);
    }

    #[test]
    fn test_exact() {
        check("1.2.3", &["1.2.3"], &["1.2.4", "1.2.2"]);
        check("=1.2.3", &["1.2.3"], &["1.2.4"]);
        check("v1.2.3", &["1.2.3"], &["1.2.4"]);
        check("1.2.3", &["1.2.3+build.5"], &[]);
    }

    #[test]
    fn test_comparators() {
        check(">=1.2.3", &["1.2.3", "9.0.0"], &["1.2.2"]);
        check(">1.2.3", &["1.2.4"], &["1.2.3"]);
        check("<1.2.3", &["1.2.2", "0.0.1"], &["1.2.3"]);
        check("<=1.2.3", &["1.2.3"], &["1.2.4"]);
        check(">= 2.1.2 < 3.0.0", &["2.1.2", "2.5.0"], &["3.0.0", "2.1.1"]);
        check(">=2.1.2 <3.0.0", &["2.9.9"], &["3.0.0"]);
    }

    #[test]
    fn test_partial_comparators() {
        check(">1.2", &["1.3.0"], &["1.2.9"]);
        check(">1", &["2.0.0"], &["1.9.9"]);
        check("<1.2", &["1.1.9"], &["1.2.0"]);
        check("<=1.2", &["1.2.9"], &["1.3.0"]);
        check(">=1.2", &["1.2.0"], &["1.1.9"]);
    }

    #[test]
    fn test_caret() {
        check("^1.2.3", &["1.2.3", "1.9.9"], &["2.0.0", "1.2.2"]);
        check("^0.2.3", &["0.2.3", "0.2.9"], &["0.3.0"]);
        check("^0.0.3", &["0.0.3"], &["0.0.4"]);
        check("^1.x", &["1.0.0", "1.9.0"], &["2.0.0"]);
        check("^0.0", &["0.0.0", "0.0.9"], &["0.1.0"]);
        check("^0.x", &["0.0.0", "0.9.9"], &["1.0.0"]);
        check("^0.1", &["0.1.0", "0.1.9"], &["0.2.0"]);
        check("^1", &["1.0.0", "1.9.9"], &["2.0.0"]);
    }

    #[test]
    fn test_tilde() {
        check("~1.2.3", &["1.2.3", "1.2.9"], &["1.3.0", "1.2.2"]);
        check("~1.2", &["1.2.0", "1.2.9"], &["1.3.0"]);
        check("~1", &["1.0.0", "1.9.9"], &["2.0.0"]);
        check("~0.2.3", &["0.2.3"], &["0.3.0"]);
        check("~>1.2.3", &["1.2.5"], &["1.3.0"]);
    }

    #[test]
    fn test_x_ranges() {
        check("1.x", &["1.0.0", "1.5.0"], &["2.0.0", "0.9.0"]);
        check("1.2.x", &["1.2.0", "1.2.9"], &["1.3.0"]);
        check("1.2.*", &["1.2.9"], &["1.3.0"]);
        check("1", &["1.0.0", "1.9.9"], &["2.0.0"]);
        check("1.2", &["1.2.0", "1.2.9"], &["1.3.0"]);
        check("*", &["0.0.1", "99.0.0"], &[]);
        check("x", &["1.0.0"], &[]);
        check("", &["1.0.0"], &[]);
        check("latest", &["3.1.4"], &[]);
    }

    #[test]
    fn test_hyphen() {
        check("1.0.0 - 2.0.0", &["1.0.0", "2.0.0"], &["2.0.1", "0.9.9"]);
        check("1.2 - 2.3", &["1.2.0", "2.3.9"], &["2.4.0", "1.1.9"]);
        check("1.2.3 - 2", &["2.9.9"], &["3.0.0"]);
    }

    #[test]
    fn test_or() {
        check("^1.0.0 || ^3.0.0", &["1.5.0", "3.1.0"], &["2.0.0"]);
        check("^14.0.0||^15.0.0", &["15.0.0"], &["16.0.0"]);
        assert_eq!(
            max(&["1.5.0", "2.5.0"], "^1.0.0 || ^2.0.0").as_deref(),
            Some("2.5.0")
        );
    }

    #[test]
    fn test_prerelease_excluded_by_default() {
        let list = ["1.0.0", "2.0.0-alpha.1", "2.0.0-beta.1"];
        assert_eq!(max(&list, "*").as_deref(), Some("1.0.0"));
        assert_eq!(max(&list, ">=1.0.0").as_deref(), Some("1.0.0"));
        check("^1.0.0", &[], &["1.1.0-rc.1", "2.0.0-0"]);
    }

    #[test]
    fn test_prerelease_pinned() {
        let list = ["1.0.0", "2.0.0-alpha.1", "2.0.0-beta.1"];
        assert_eq!(
            max(&list, "2.0.0-alpha.1").as_deref(),
            Some("2.0.0-alpha.1")
        );
        // Same tuple prereleases are allowed once the range names one.
        assert_eq!(
            max(&list, ">=2.0.0-alpha.1").as_deref(),
            Some("2.0.0-beta.1")
        );
        check("^2.0.0-alpha.1", &["2.0.0-beta.1", "2.0.0", "2.1.0"], &["2.1.0-beta.1"]);
    }

    #[test]
    fn test_precedence_ordering() {
        let mut list = vs(&[
            "1.0.0",
            "1.0.0-alpha",
            "1.0.0-alpha.1",
            "1.0.0-alpha.beta",
            "1.0.0-beta",
            "1.0.0-beta.2",
            "1.0.0-beta.11",
            "1.0.0-rc.1",
        ]);
        list.reverse();
        list.sort_by(compare_precedence);
        let sorted: Vec<String> = list.iter().map(ToString::to_string).collect();
        assert_eq!(
            sorted,
            [
                "1.0.0-alpha",
                "1.0.0-alpha.1",
                "1.0.0-alpha.beta",
                "1.0.0-beta",
                "1.0.0-beta.2",
                "1.0.0-beta.11",
                "1.0.0-rc.1",
                "1.0.0"
            ]
        );
    }

    #[test]
    fn test_all_satisfying_highest_first() {
        let versions = vs(&["1.0.0", "1.2.0", "1.1.0", "2.0.0"]);
        let range = Range::parse("^1").unwrap();
        let all: Vec<String> = range
            .all_satisfying(&versions)
            .into_iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(all, ["1.2.0", "1.1.0", "1.0.0"]);
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(Range::parse("not-a-range!!!").is_err());
        assert!(Range::parse("next").is_err());
        assert!(Range::parse("1.2.3.4").is_err());
        assert!(Range::parse("1.2-beta").is_err());
        assert!(!satisfies(&v("1.0.0"), "garbage"));
    }

    #[test]
    fn test_wildcard_comparators() {
        check(">=*", &["0.0.0", "5.0.0"], &[]);
        check("<*", &[], &["0.0.0", "5.0.0"]);
    }

    #[test]
    fn test_display_keeps_expression() {
        let range: Range = " ^1.2.3 ".parse().unwrap();
        assert_eq!(range.to_string(), "^1.2.3");
        assert_eq!(range.as_str(), "^1.2.3");
    }

    #[test]
    fn test_huge_components_are_invalid() {
        let max = u64::MAX;
        for expr in [
            format!("^{max}.0.0"),
            format!("^0.{max}.0"),
            format!("^0.0.{max}"),
            format!("~{max}"),
            format!("~1.{max}"),
            format!("{max}.x"),
            format!("1.{max}"),
            format!(">{max}"),
            format!(">1.{max}"),
            format!("<={max}"),
            format!("1.0.0 - {max}"),
            format!("1.0.0 - 1.{max}"),
        ] {
            let err = Range::parse(&expr).unwrap_err();
            assert_eq!(err.code(), crate::pkg::error::codes::MIRROR_RANGE_INVALID, "{expr}");
            assert!(err.message().contains("too large"), "{expr}: {}", err.message());
        }
    }

    #[test]
    fn test_huge_components_without_bump_still_parse() {
        let max = u64::MAX;
        let top = format!("{max}.0.0");
        let all_max = format!("{max}.{max}.{max}");
        check(&format!(">={top}"), &[top.as_str()], &["1.0.0"]);
        check(&format!("={all_max}"), &[all_max.as_str()], &[]);
        assert!(!satisfies(&v("1.0.0"), &format!("^{max}.0.0")));
    }
}
