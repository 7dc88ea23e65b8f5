//! Schema validation: required fields, defaults, ranges and allowed values.
//!
//! Policy is a small rule language with three primitives, applied per
//! (section, field): a field may be required (`require`), optional with a
//! default injected on absence (`default_if_missing`), or bounded by a
//! range/set check (`check_range`, `check_set`, `check_bool`). Any violation
//! is fatal and stops the run before a single task executes.

use tracing::warn;

use crate::error::BlueprintError;

use super::load::RawBlueprint;
use super::types::SectionKind;

pub const BOOL_LITERALS: [&str; 2] = ["True", "False"];
pub const ENGINE_KINDS: [&str; 4] = ["postgres", "postgresql", "mysql", "mariadb"];
pub const RESULT_FORMATS: [&str; 2] = ["csv", "xlsx"];

const BUILD_KEYS: [&str; 3] = ["TASKS", "WORKERS", "LOCAL_SCHEDULER"];

/// Verify required fields, inject defaults and enforce value bounds for every
/// section. Returns the normalized sections; the input is consumed so later
/// stages only ever see the validated value.
pub fn normalize(mut raw: RawBlueprint) -> Result<RawBlueprint, BlueprintError> {
    normalize_build(&mut raw)?;

    for name in raw.section_names() {
        let section = raw.section(&name).expect("section listed but missing");
        if section.is_reserved() {
            continue;
        }

        match section_kind(&raw, &name)? {
            SectionKind::Creds => normalize_creds(&mut raw, &name)?,
            SectionKind::SshProxy => normalize_proxy(&mut raw, &name)?,
            SectionKind::Db => normalize_database(&mut raw, &name)?,
            SectionKind::LocalTask => normalize_local(&mut raw, &name)?,
            SectionKind::RemoteTask => normalize_remote(&mut raw, &name)?,
            SectionKind::DbTask => normalize_db_task(&mut raw, &name)?,
        }
    }

    Ok(raw)
}

/// Read and parse a section's `TYPE` parameter. Missing or unknown kinds are
/// fatal: the kind partition is closed.
pub fn section_kind(raw: &RawBlueprint, name: &str) -> Result<SectionKind, BlueprintError> {
    let section = raw
        .section(name)
        .ok_or_else(|| BlueprintError::MissingSection(name.to_string()))?;

    let kind = section.get("TYPE").ok_or_else(|| BlueprintError::MissingField {
        section: name.to_string(),
        field: "TYPE".to_string(),
    })?;

    SectionKind::parse(kind).ok_or_else(|| BlueprintError::UnknownKind {
        section: name.to_string(),
        kind: kind.to_string(),
    })
}

pub fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn normalize_build(raw: &mut RawBlueprint) -> Result<(), BlueprintError> {
    if !raw.contains("BUILD") {
        return Err(BlueprintError::MissingSection("BUILD".to_string()));
    }

    for key in raw.section("BUILD").expect("BUILD present").options.keys() {
        if !BUILD_KEYS.contains(&key.as_str()) {
            return Err(BlueprintError::UnknownBuildKey { key: key.clone() });
        }
    }

    require(raw, "BUILD", "TASKS")?;
    default_if_missing(raw, "BUILD", "WORKERS", "8");
    check_integer(raw, "BUILD", "WORKERS")?;
    default_if_missing(raw, "BUILD", "LOCAL_SCHEDULER", "True");
    check_bool(raw, "BUILD", "LOCAL_SCHEDULER")?;
    Ok(())
}

fn normalize_creds(raw: &mut RawBlueprint, name: &str) -> Result<(), BlueprintError> {
    require(raw, name, "USER")?;
    default_if_missing(raw, name, "PASS", "");
    default_if_missing(raw, name, "KEY", "");
    Ok(())
}

fn normalize_proxy(raw: &mut RawBlueprint, name: &str) -> Result<(), BlueprintError> {
    require(raw, name, "HOST")?;
    require(raw, name, "CREDS")?;
    default_if_missing(raw, name, "PORT", "22");
    check_range(raw, name, "PORT", 0, 65535)?;
    Ok(())
}

fn normalize_database(raw: &mut RawBlueprint, name: &str) -> Result<(), BlueprintError> {
    require(raw, name, "ENGINE")?;
    check_set(raw, name, "ENGINE", &ENGINE_KINDS)?;
    require(raw, name, "DBHOST")?;
    require(raw, name, "DBNAME")?;
    require(raw, name, "DBPORT")?;
    check_range(raw, name, "DBPORT", 0, 65535)?;
    require(raw, name, "CREDS")?;
    Ok(())
}

fn normalize_local(raw: &mut RawBlueprint, name: &str) -> Result<(), BlueprintError> {
    require(raw, name, "COMMAND")?;
    require(raw, name, "RESULTS")?;
    default_if_missing(raw, name, "SUCCESS_EXIT_CODE", "0");
    check_range(raw, name, "SUCCESS_EXIT_CODE", 0, 255)?;
    default_if_missing(raw, name, "REQUIRES", "[]");
    default_if_missing(raw, name, "CLEANUP", "False");
    check_bool(raw, name, "CLEANUP")?;
    Ok(())
}

fn normalize_remote(raw: &mut RawBlueprint, name: &str) -> Result<(), BlueprintError> {
    require(raw, name, "COMMAND")?;
    require(raw, name, "HOST")?;
    require(raw, name, "RESULTS")?;
    require(raw, name, "CREDS")?;
    default_if_missing(raw, name, "SUCCESS_EXIT_CODE", "0");
    check_range(raw, name, "SUCCESS_EXIT_CODE", 0, 255)?;
    default_if_missing(raw, name, "PORT", "22");
    check_range(raw, name, "PORT", 0, 65535)?;
    default_if_missing(raw, name, "TIMEOUT", "10");
    check_range(raw, name, "TIMEOUT", 0, 60)?;
    default_if_missing(raw, name, "REQUIRES", "[]");
    default_if_missing(raw, name, "CLEANUP", "False");
    check_bool(raw, name, "CLEANUP")?;
    default_if_missing(raw, name, "USE_PROXY", "False");
    check_bool(raw, name, "USE_PROXY")?;
    Ok(())
}

fn normalize_db_task(raw: &mut RawBlueprint, name: &str) -> Result<(), BlueprintError> {
    require(raw, name, "QUERY")?;
    require(raw, name, "DB")?;
    require(raw, name, "RESULTS")?;
    default_if_missing(raw, name, "RESULTS_TYPE", "csv");
    check_set(raw, name, "RESULTS_TYPE", &RESULT_FORMATS)?;
    default_if_missing(raw, name, "REQUIRES", "[]");
    default_if_missing(raw, name, "CLEANUP", "False");
    check_bool(raw, name, "CLEANUP")?;
    default_if_missing(raw, name, "USE_PROXY", "False");
    check_bool(raw, name, "USE_PROXY")?;
    default_if_missing(raw, name, "PROXY", "");
    Ok(())
}

/// `must-exist` + `must-be-non-empty`, both fatal.
fn require(raw: &RawBlueprint, section: &str, field: &str) -> Result<(), BlueprintError> {
    let s = raw
        .section(section)
        .ok_or_else(|| BlueprintError::MissingSection(section.to_string()))?;

    match s.get(field) {
        None => Err(BlueprintError::MissingField {
            section: section.to_string(),
            field: field.to_string(),
        }),
        Some(v) if v.trim().is_empty() => Err(BlueprintError::EmptyField {
            section: section.to_string(),
            field: field.to_string(),
        }),
        Some(_) => Ok(()),
    }
}

/// `must-be-non-empty` with a configured default: inject and warn instead of
/// failing.
fn default_if_missing(raw: &mut RawBlueprint, section: &str, field: &str, default: &str) {
    let Some(s) = raw.section_mut(section) else {
        return;
    };

    let missing = match s.get(field) {
        None => true,
        Some(v) => v.trim().is_empty() && !default.is_empty(),
    };

    if missing {
        warn!(
            "Task \"{}\" has no \"{}\" parameter, defaulting to \"{}\"",
            section, field, default
        );
        s.set(field, default);
    }
}

fn check_integer(raw: &RawBlueprint, section: &str, field: &str) -> Result<i64, BlueprintError> {
    let value = raw
        .section(section)
        .and_then(|s| s.get(field))
        .unwrap_or_default();

    value
        .trim()
        .parse::<i64>()
        .map_err(|_| BlueprintError::NotAnInteger {
            section: section.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        })
}

/// `must-be-in-range(lo, hi)`, bounds inclusive. Implies an integer check.
fn check_range(
    raw: &RawBlueprint,
    section: &str,
    field: &str,
    lo: i64,
    hi: i64,
) -> Result<(), BlueprintError> {
    let value = check_integer(raw, section, field)?;
    if value < lo || value > hi {
        return Err(BlueprintError::OutOfRange {
            section: section.to_string(),
            field: field.to_string(),
            value,
            lo,
            hi,
        });
    }
    Ok(())
}

/// `must-be-in-set(values)`.
fn check_set(
    raw: &RawBlueprint,
    section: &str,
    field: &str,
    allowed: &[&str],
) -> Result<(), BlueprintError> {
    let value = raw
        .section(section)
        .and_then(|s| s.get(field))
        .unwrap_or_default();

    if !allowed.contains(&value) {
        return Err(BlueprintError::NotAllowed {
            section: section.to_string(),
            field: field.to_string(),
            value: value.to_string(),
            allowed: allowed.join(", "),
        });
    }
    Ok(())
}

/// Boolean fields accept exactly a boolean literal, case-insensitively.
fn check_bool(raw: &RawBlueprint, section: &str, field: &str) -> Result<(), BlueprintError> {
    let value = raw
        .section(section)
        .and_then(|s| s.get(field))
        .unwrap_or_default();

    parse_bool(value)
        .map(|_| ())
        .ok_or_else(|| BlueprintError::NotAllowed {
            section: section.to_string(),
            field: field.to_string(),
            value: value.to_string(),
            allowed: BOOL_LITERALS.join(", "),
        })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn parse(text: &str) -> RawBlueprint {
        RawBlueprint::from_str_named(text, Path::new("test.blueprint")).unwrap()
    }

    const MINIMAL_BUILD: &str = "[BUILD]\nTASKS = [a]\n";

    #[test]
    fn local_task_defaults_are_injected() {
        let raw = parse(&format!(
            "{MINIMAL_BUILD}\n[a]\nTYPE = LOCAL_TASK\nCOMMAND = printf ok\nRESULTS = /tmp/a.out\n"
        ));
        let raw = normalize(raw).unwrap();

        let a = raw.section("a").unwrap();
        assert_eq!(a.get("SUCCESS_EXIT_CODE"), Some("0"));
        assert_eq!(a.get("REQUIRES"), Some("[]"));
        assert_eq!(a.get("CLEANUP"), Some("False"));
    }

    #[test]
    fn remote_task_port_and_timeout_default() {
        let raw = parse(&format!(
            "{MINIMAL_BUILD}\n[c]\nTYPE = CREDS\nUSER = deploy\n\n[a]\nTYPE = REMOTE_TASK\n\
             COMMAND = uptime\nHOST = box1\nRESULTS = /tmp/a.out\nCREDS = c\n"
        ));
        let raw = normalize(raw).unwrap();

        let a = raw.section("a").unwrap();
        assert_eq!(a.get("PORT"), Some("22"));
        assert_eq!(a.get("TIMEOUT"), Some("10"));
        assert_eq!(a.get("USE_PROXY"), Some("False"));
    }

    #[test]
    fn missing_required_field_is_fatal() {
        let raw = parse(&format!(
            "{MINIMAL_BUILD}\n[a]\nTYPE = LOCAL_TASK\nRESULTS = /tmp/a.out\n"
        ));
        let err = normalize(raw).unwrap_err();
        assert!(
            matches!(err, BlueprintError::MissingField { ref section, ref field }
                if section == "a" && field == "COMMAND")
        );
    }

    #[test]
    fn timeout_out_of_range_is_fatal() {
        let raw = parse(&format!(
            "{MINIMAL_BUILD}\n[c]\nTYPE = CREDS\nUSER = deploy\n\n[a]\nTYPE = REMOTE_TASK\n\
             COMMAND = uptime\nHOST = box1\nRESULTS = /tmp/a.out\nCREDS = c\nTIMEOUT = 90\n"
        ));
        let err = normalize(raw).unwrap_err();
        assert!(matches!(err, BlueprintError::OutOfRange { hi: 60, .. }));
    }

    #[test]
    fn cleanup_must_be_a_boolean_literal() {
        let raw = parse(&format!(
            "{MINIMAL_BUILD}\n[a]\nTYPE = LOCAL_TASK\nCOMMAND = printf ok\n\
             RESULTS = /tmp/a.out\nCLEANUP = yes\n"
        ));
        let err = normalize(raw).unwrap_err();
        assert!(matches!(err, BlueprintError::NotAllowed { .. }));
    }

    #[test]
    fn unknown_type_is_fatal() {
        let raw = parse(&format!("{MINIMAL_BUILD}\n[a]\nTYPE = CRON_TASK\n"));
        let err = normalize(raw).unwrap_err();
        assert!(matches!(err, BlueprintError::UnknownKind { .. }));
    }

    #[test]
    fn missing_type_is_fatal() {
        let raw = parse(&format!("{MINIMAL_BUILD}\n[a]\nCOMMAND = printf ok\n"));
        let err = normalize(raw).unwrap_err();
        assert!(
            matches!(err, BlueprintError::MissingField { ref field, .. } if field == "TYPE")
        );
    }

    #[test]
    fn build_rejects_unknown_keys() {
        let raw = parse("[BUILD]\nTASKS = [a]\nRETRIES = 3\n\n[a]\nTYPE = LOCAL_TASK\nCOMMAND = x\nRESULTS = /tmp/a\n");
        let err = normalize(raw).unwrap_err();
        assert!(matches!(err, BlueprintError::UnknownBuildKey { .. }));
    }

    #[test]
    fn build_workers_must_be_integer() {
        let raw = parse("[BUILD]\nTASKS = [a]\nWORKERS = many\n\n[a]\nTYPE = LOCAL_TASK\nCOMMAND = x\nRESULTS = /tmp/a\n");
        let err = normalize(raw).unwrap_err();
        assert!(matches!(err, BlueprintError::NotAnInteger { .. }));
    }

    #[test]
    fn missing_build_section_is_fatal() {
        let raw = parse("[a]\nTYPE = LOCAL_TASK\nCOMMAND = x\nRESULTS = /tmp/a\n");
        let err = normalize(raw).unwrap_err();
        assert!(matches!(err, BlueprintError::MissingSection(ref s) if s == "BUILD"));
    }

    #[test]
    fn database_engine_is_bounded() {
        let raw = parse(&format!(
            "{MINIMAL_BUILD}\n[a]\nTYPE = LOCAL_TASK\nCOMMAND = x\nRESULTS = /tmp/a\n\n\
             [warehouse]\nTYPE = DB\nENGINE = oracle\nDBHOST = db1\nDBPORT = 5432\n\
             DBNAME = sales\nCREDS = c\n\n[c]\nTYPE = CREDS\nUSER = u\n"
        ));
        let err = normalize(raw).unwrap_err();
        assert!(
            matches!(err, BlueprintError::NotAllowed { ref field, .. } if field == "ENGINE")
        );
    }
}
