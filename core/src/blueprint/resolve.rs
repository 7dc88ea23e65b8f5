//! Reference resolution: the stage between normalized sections and the
//! immutable [`Blueprint`] value handed to the scheduler.
//!
//! Every symbolic reference (`REQUIRES` entries, `CREDS`, `PROXY`, `DB`,
//! `BUILD.TASKS`) is checked against the declared sections and their kinds.
//! List-valued fields accept only a bracketed comma-separated list of bare
//! identifiers; nothing is ever evaluated.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::BlueprintError;

use super::load::{RawBlueprint, RawSection};
use super::schema::{parse_bool, section_kind};
use super::types::{
    Blueprint, BuildPlan, Credential, Database, DbEngine, DbSpec, LocalSpec, Proxy, RemoteSpec,
    ResultFormat, SectionKind, Task, TaskKind,
};

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]*$").unwrap();
}

/// Parse a strict `[a,b,c]` list literal into identifiers. `[]` is the empty
/// list; anything that is not a bracketed list of bare identifiers is a
/// validation error.
pub fn parse_name_list(
    section: &str,
    field: &str,
    value: &str,
) -> Result<Vec<String>, BlueprintError> {
    let trimmed = value.trim();

    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| BlueprintError::InvalidList {
            section: section.to_string(),
            field: field.to_string(),
            reason: format!("expected '[name,name,...]', got '{value}'"),
        })?;

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for item in inner.split(',') {
        let item = item.trim();
        if !IDENTIFIER.is_match(item) {
            return Err(BlueprintError::InvalidList {
                section: section.to_string(),
                field: field.to_string(),
                reason: format!("'{item}' is not a bare identifier"),
            });
        }
        names.push(item.to_string());
    }
    Ok(names)
}

/// Resolve normalized sections into the typed, immutable blueprint.
pub fn resolve(raw: &RawBlueprint) -> Result<Blueprint, BlueprintError> {
    let kinds = collect_kinds(raw)?;

    let mut credentials = HashMap::new();
    let mut proxies = HashMap::new();
    let mut databases = HashMap::new();
    let mut tasks = HashMap::new();
    let mut task_order = Vec::new();

    for section in raw.sections() {
        if section.is_reserved() {
            continue;
        }

        match kinds[&section.name] {
            SectionKind::Creds => {
                credentials.insert(section.name.clone(), resolve_credential(section));
            }
            SectionKind::SshProxy => {
                proxies.insert(section.name.clone(), resolve_proxy(section, &kinds)?);
            }
            SectionKind::Db => {
                databases.insert(section.name.clone(), resolve_database(section, &kinds)?);
            }
            kind if kind.is_task() => {
                let task = resolve_task(section, kind, &kinds)?;
                task_order.push(task.name.clone());
                tasks.insert(task.name.clone(), task);
            }
            _ => unreachable!("non-task kinds handled above"),
        }
    }

    // Dependencies can only be checked once every task is known.
    for task in tasks.values() {
        for dep in &task.requires {
            if !tasks.contains_key(dep) {
                return Err(BlueprintError::UnknownDependency {
                    task: task.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    let build = resolve_build(raw, &tasks)?;

    Ok(Blueprint {
        credentials,
        proxies,
        databases,
        tasks,
        task_order,
        build,
    })
}

fn collect_kinds(raw: &RawBlueprint) -> Result<HashMap<String, SectionKind>, BlueprintError> {
    let mut kinds = HashMap::new();
    for section in raw.sections() {
        if section.is_reserved() {
            continue;
        }
        kinds.insert(section.name.clone(), section_kind(raw, &section.name)?);
    }
    Ok(kinds)
}

fn field<'a>(section: &'a RawSection, name: &str) -> Result<&'a str, BlueprintError> {
    section.get(name).ok_or_else(|| BlueprintError::MissingField {
        section: section.name.clone(),
        field: name.to_string(),
    })
}

fn int_field(section: &RawSection, name: &str) -> Result<i64, BlueprintError> {
    let value = field(section, name)?;
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| BlueprintError::NotAnInteger {
            section: section.name.clone(),
            field: name.to_string(),
            value: value.to_string(),
        })
}

fn bool_field(section: &RawSection, name: &str) -> Result<bool, BlueprintError> {
    let value = field(section, name)?;
    parse_bool(value).ok_or_else(|| BlueprintError::NotAllowed {
        section: section.name.clone(),
        field: name.to_string(),
        value: value.to_string(),
        allowed: "True, False".to_string(),
    })
}

fn path_field(section: &RawSection, name: &str) -> Result<PathBuf, BlueprintError> {
    let value = field(section, name)?;
    Ok(PathBuf::from(shellexpand::tilde(value.trim()).into_owned()))
}

/// Verify that `target` names a declared section of the expected kind.
fn check_reference(
    section: &RawSection,
    fieldname: &str,
    target: &str,
    expected: SectionKind,
    kinds: &HashMap<String, SectionKind>,
) -> Result<(), BlueprintError> {
    match kinds.get(target) {
        None => Err(BlueprintError::UnknownReference {
            section: section.name.clone(),
            field: fieldname.to_string(),
            target: target.to_string(),
        }),
        Some(found) if *found != expected => Err(BlueprintError::ReferenceKindMismatch {
            section: section.name.clone(),
            field: fieldname.to_string(),
            target: target.to_string(),
            expected: expected.label(),
            found: found.label().to_string(),
        }),
        Some(_) => Ok(()),
    }
}

fn resolve_credential(section: &RawSection) -> Credential {
    Credential {
        user: section.get("USER").unwrap_or_default().to_string(),
        password: section.get("PASS").unwrap_or_default().to_string(),
        private_key: shellexpand::tilde(section.get("KEY").unwrap_or_default()).into_owned(),
    }
}

fn resolve_proxy(
    section: &RawSection,
    kinds: &HashMap<String, SectionKind>,
) -> Result<Proxy, BlueprintError> {
    let creds = field(section, "CREDS")?.to_string();
    check_reference(section, "CREDS", &creds, SectionKind::Creds, kinds)?;

    Ok(Proxy {
        host: field(section, "HOST")?.to_string(),
        port: int_field(section, "PORT")? as u16,
        credentials: creds,
    })
}

fn resolve_database(
    section: &RawSection,
    kinds: &HashMap<String, SectionKind>,
) -> Result<Database, BlueprintError> {
    let creds = field(section, "CREDS")?.to_string();
    check_reference(section, "CREDS", &creds, SectionKind::Creds, kinds)?;

    let engine_name = field(section, "ENGINE")?;
    let engine = DbEngine::parse(engine_name).ok_or_else(|| BlueprintError::NotAllowed {
        section: section.name.clone(),
        field: "ENGINE".to_string(),
        value: engine_name.to_string(),
        allowed: "postgres, postgresql, mysql, mariadb".to_string(),
    })?;

    Ok(Database {
        engine,
        host: field(section, "DBHOST")?.to_string(),
        port: int_field(section, "DBPORT")? as u16,
        name: field(section, "DBNAME")?.to_string(),
        credentials: creds,
    })
}

/// A remote or db task opting into tunneling must carry a `PROXY` reference
/// naming an `SSH_PROXY` section.
fn resolve_task_proxy(
    section: &RawSection,
    kinds: &HashMap<String, SectionKind>,
) -> Result<Option<String>, BlueprintError> {
    if !bool_field(section, "USE_PROXY")? {
        return Ok(None);
    }

    let proxy = section.get("PROXY").unwrap_or_default().trim().to_string();
    if proxy.is_empty() {
        return Err(BlueprintError::EmptyField {
            section: section.name.clone(),
            field: "PROXY".to_string(),
        });
    }
    check_reference(section, "PROXY", &proxy, SectionKind::SshProxy, kinds)?;
    Ok(Some(proxy))
}

fn resolve_task(
    section: &RawSection,
    kind: SectionKind,
    kinds: &HashMap<String, SectionKind>,
) -> Result<Task, BlueprintError> {
    let requires = parse_name_list(&section.name, "REQUIRES", field(section, "REQUIRES")?)?;
    if requires.iter().any(|dep| dep == &section.name) {
        return Err(BlueprintError::SelfDependency {
            task: section.name.clone(),
        });
    }

    let task_kind = match kind {
        SectionKind::LocalTask => TaskKind::Local(LocalSpec {
            command: field(section, "COMMAND")?.to_string(),
            success_exit_code: int_field(section, "SUCCESS_EXIT_CODE")? as i32,
        }),
        SectionKind::RemoteTask => {
            let creds = field(section, "CREDS")?.to_string();
            check_reference(section, "CREDS", &creds, SectionKind::Creds, kinds)?;
            TaskKind::Remote(RemoteSpec {
                command: field(section, "COMMAND")?.to_string(),
                host: field(section, "HOST")?.to_string(),
                port: int_field(section, "PORT")? as u16,
                timeout: Duration::from_secs(int_field(section, "TIMEOUT")? as u64),
                credentials: creds,
                proxy: resolve_task_proxy(section, kinds)?,
                success_exit_code: int_field(section, "SUCCESS_EXIT_CODE")? as i32,
            })
        }
        SectionKind::DbTask => {
            let db = field(section, "DB")?.to_string();
            check_reference(section, "DB", &db, SectionKind::Db, kinds)?;
            let format = field(section, "RESULTS_TYPE")?;
            TaskKind::Db(DbSpec {
                database: db,
                query_path: path_field(section, "QUERY")?,
                proxy: resolve_task_proxy(section, kinds)?,
                result_format: ResultFormat::parse(format).ok_or_else(|| {
                    BlueprintError::NotAllowed {
                        section: section.name.clone(),
                        field: "RESULTS_TYPE".to_string(),
                        value: format.to_string(),
                        allowed: "csv, xlsx".to_string(),
                    }
                })?,
            })
        }
        _ => unreachable!("resolve_task called for a non-task kind"),
    };

    Ok(Task {
        name: section.name.clone(),
        requires,
        result_path: path_field(section, "RESULTS")?,
        cleanup: bool_field(section, "CLEANUP")?,
        kind: task_kind,
    })
}

fn resolve_build(
    raw: &RawBlueprint,
    tasks: &HashMap<String, Task>,
) -> Result<BuildPlan, BlueprintError> {
    let build = raw
        .section("BUILD")
        .ok_or_else(|| BlueprintError::MissingSection("BUILD".to_string()))?;

    let requested = parse_name_list("BUILD", "TASKS", field(build, "TASKS")?)?;
    if requested.is_empty() {
        return Err(BlueprintError::EmptyBuildTasks);
    }
    for name in &requested {
        if !tasks.contains_key(name) {
            return Err(BlueprintError::UnknownBuildTask { task: name.clone() });
        }
    }

    Ok(BuildPlan {
        tasks: requested,
        workers: int_field(build, "WORKERS")?.max(1) as usize,
        local_scheduler: bool_field(build, "LOCAL_SCHEDULER")?,
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::blueprint::{normalize, RawBlueprint};

    fn resolved(text: &str) -> Result<Blueprint, BlueprintError> {
        let raw = RawBlueprint::from_str_named(text, Path::new("test.blueprint")).unwrap();
        resolve(&normalize(raw)?)
    }

    const FIXTURE: &str = "\
[BUILD]
TASKS = [report,collect]

[ops]
TYPE = CREDS
USER = deploy
PASS = hunter2

[edge]
TYPE = SSH_PROXY
HOST = bastion.internal
CREDS = ops

[warehouse]
TYPE = DB
ENGINE = postgres
DBHOST = db1.internal
DBPORT = 5432
DBNAME = sales
CREDS = ops

[collect]
TYPE = REMOTE_TASK
COMMAND = /opt/collect.sh
HOST = box1.internal
CREDS = ops
USE_PROXY = True
PROXY = edge
RESULTS = /tmp/collect.out

[report]
TYPE = DB_TASK
QUERY = /tmp/report.sql
DB = warehouse
RESULTS = /tmp/report.csv
REQUIRES = [collect]
";

    #[test]
    fn full_blueprint_resolves() {
        let bp = resolved(FIXTURE).unwrap();

        assert_eq!(bp.build.tasks, vec!["report", "collect"]);
        assert_eq!(bp.build.workers, 8);
        assert_eq!(bp.proxy("edge").unwrap().port, 22);

        let collect = bp.task("collect").unwrap();
        let TaskKind::Remote(ref spec) = collect.kind else {
            panic!("collect should be a remote task");
        };
        assert_eq!(spec.proxy.as_deref(), Some("edge"));
        assert_eq!(spec.port, 22);

        let report = bp.task("report").unwrap();
        assert_eq!(report.requires, vec!["collect"]);
        let TaskKind::Db(ref spec) = report.kind else {
            panic!("report should be a db task");
        };
        assert_eq!(spec.result_format, ResultFormat::Csv);
        assert_eq!(spec.database, "warehouse");
    }

    #[test]
    fn self_dependency_is_fatal() {
        let err = resolved(
            "[BUILD]\nTASKS = [a]\n\n[a]\nTYPE = LOCAL_TASK\nCOMMAND = x\n\
             RESULTS = /tmp/a\nREQUIRES = [a]\n",
        )
        .unwrap_err();
        assert!(matches!(err, BlueprintError::SelfDependency { ref task } if task == "a"));
    }

    #[test]
    fn unknown_dependency_is_fatal() {
        let err = resolved(
            "[BUILD]\nTASKS = [a]\n\n[a]\nTYPE = LOCAL_TASK\nCOMMAND = x\n\
             RESULTS = /tmp/a\nREQUIRES = [ghost]\n",
        )
        .unwrap_err();
        assert!(
            matches!(err, BlueprintError::UnknownDependency { ref dependency, .. }
                if dependency == "ghost")
        );
    }

    #[test]
    fn build_task_must_be_declared() {
        let err = resolved(
            "[BUILD]\nTASKS = [a,ghost]\n\n[a]\nTYPE = LOCAL_TASK\nCOMMAND = x\nRESULTS = /tmp/a\n",
        )
        .unwrap_err();
        assert!(matches!(err, BlueprintError::UnknownBuildTask { ref task } if task == "ghost"));
    }

    #[test]
    fn proxy_reference_must_be_an_ssh_proxy_section() {
        let err = resolved(
            "[BUILD]\nTASKS = [a]\n\n[ops]\nTYPE = CREDS\nUSER = u\n\n\
             [a]\nTYPE = REMOTE_TASK\nCOMMAND = x\nHOST = h\nCREDS = ops\n\
             USE_PROXY = True\nPROXY = ops\nRESULTS = /tmp/a\n",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            BlueprintError::ReferenceKindMismatch {
                expected: "SSH_PROXY",
                ..
            }
        ));
    }

    #[test]
    fn use_proxy_without_proxy_reference_is_fatal() {
        let err = resolved(
            "[BUILD]\nTASKS = [a]\n\n[ops]\nTYPE = CREDS\nUSER = u\n\n\
             [a]\nTYPE = REMOTE_TASK\nCOMMAND = x\nHOST = h\nCREDS = ops\n\
             USE_PROXY = True\nRESULTS = /tmp/a\n",
        )
        .unwrap_err();
        assert!(
            matches!(err, BlueprintError::EmptyField { ref field, .. } if field == "PROXY")
        );
    }

    #[test]
    fn requires_must_be_a_bracketed_list() {
        let err = resolved(
            "[BUILD]\nTASKS = [a]\n\n[a]\nTYPE = LOCAL_TASK\nCOMMAND = x\n\
             RESULTS = /tmp/a\nREQUIRES = b, c\n",
        )
        .unwrap_err();
        assert!(matches!(err, BlueprintError::InvalidList { .. }));
    }

    #[test]
    fn list_items_must_be_bare_identifiers() {
        let err = parse_name_list("a", "REQUIRES", "[b,__import__('os')]").unwrap_err();
        assert!(matches!(err, BlueprintError::InvalidList { .. }));

        assert_eq!(parse_name_list("a", "REQUIRES", "[]").unwrap(), Vec::<String>::new());
        assert_eq!(
            parse_name_list("a", "REQUIRES", "[ b , c ]").unwrap(),
            vec!["b", "c"]
        );
    }

    #[test]
    fn creds_reference_must_exist() {
        let err = resolved(
            "[BUILD]\nTASKS = [a]\n\n[a]\nTYPE = REMOTE_TASK\nCOMMAND = x\nHOST = h\n\
             CREDS = ghost\nRESULTS = /tmp/a\n",
        )
        .unwrap_err();
        assert!(
            matches!(err, BlueprintError::UnknownReference { ref target, .. } if target == "ghost")
        );
    }
}
