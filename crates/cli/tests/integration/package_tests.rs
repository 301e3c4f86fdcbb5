//! Tests for `possum package`.

use predicates::prelude::*;
use serial_test::serial;

use super::common::{TestEnv, archive_entries};

const TEMPLATE: &str = r#"AWSTemplateFormatVersion: '2010-09-09'
Transform: AWS::Serverless-2016-10-31
Globals:
  Function:
    Runtime: python3.12
    Handler: app.handler
Resources:
  Hello:
    Type: AWS::Serverless::Function
    Properties:
      CodeUri: hello/
  Legacy:
    Type: AWS::Serverless::Function
    Properties:
      CodeUri: legacy/
      Runtime: nodejs20.x
  Api:
    Type: AWS::Serverless::Api
    Properties:
      StageName: prod
      DefinitionUri: api.yaml
"#;

fn project() -> TestEnv {
  let env = TestEnv::new();
  env.write_file("template.yaml", TEMPLATE);
  env.write_file("hello/app.py", "def handler(event, context):\n    return 'hi'\n");
  env.write_file("legacy/index.js", "exports.handler = () => {}\n");
  env.write_file("api.yaml", "openapi: 3.0.0\n");
  env
}

#[test]
#[serial]
fn prints_rewritten_template_to_stdout() {
  let env = project();
  let destination = env.destination();

  let output = env.possum_cmd().args(["package", &destination]).output().unwrap();
  assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

  let stdout = String::from_utf8(output.stdout).unwrap();
  let objects = env.stored_objects();
  assert_eq!(objects.len(), 2);

  let archive = objects.iter().find(|k| k.ends_with(".zip")).unwrap();
  let definition = objects.iter().find(|k| k.ends_with("Api.swagger")).unwrap();
  assert!(archive.starts_with("possum-"));
  assert!(stdout.contains(&format!("CodeUri: {}/{}", destination, archive)));
  assert!(stdout.contains(&format!("DefinitionUri: {}/{}", destination, definition)));
  assert!(stdout.contains("CodeUri: legacy/"));

  let entries = archive_entries(&env.bucket_path().join(archive));
  assert_eq!(entries.into_iter().collect::<Vec<_>>(), vec!["app.py"]);
}

#[test]
#[serial]
fn reports_plan_and_skips_on_stderr() {
  let env = project();

  env
    .possum_cmd()
    .args(["package", &env.destination()])
    .assert()
    .success()
    .stderr(predicate::str::contains("Functions to package: Hello"))
    .stderr(predicate::str::contains("API definitions to upload: Api"))
    .stderr(predicate::str::contains("Legacy: skipped"))
    .stderr(predicate::str::contains("first build"));
}

#[test]
#[serial]
fn second_run_reuses_artifacts() {
  let env = project();
  let destination = env.destination();

  env
    .possum_cmd()
    .args(["package", &destination, "-o", "packaged.yaml"])
    .assert()
    .success();
  let first = env.read_file("packaged.yaml");
  let uploaded = env.stored_objects();

  env
    .possum_cmd()
    .args(["package", &destination, "-o", "packaged.yaml"])
    .assert()
    .success()
    .stderr(predicate::str::contains("unchanged, reusing"));

  assert_eq!(env.read_file("packaged.yaml"), first);
  assert_eq!(env.stored_objects(), uploaded);
}

#[test]
#[serial]
fn clean_flag_rebuilds_everything() {
  let env = project();
  let destination = env.destination();

  env.possum_cmd().args(["package", &destination]).assert().success();
  env
    .possum_cmd()
    .args(["package", &destination, "--clean"])
    .assert()
    .success()
    .stderr(predicate::str::contains("forced rebuild"));

  let zips = env.stored_objects().into_iter().filter(|k| k.ends_with(".zip")).count();
  assert_eq!(zips, 2);
}

#[test]
#[serial]
fn changed_source_gets_new_location() {
  let env = project();
  let destination = env.destination();

  env
    .possum_cmd()
    .args(["package", &destination, "-o", "first.yaml"])
    .assert()
    .success();
  env.write_file("hello/app.py", "def handler(event, context):\n    return 'bye'\n");
  env
    .possum_cmd()
    .args(["package", &destination, "-o", "second.yaml"])
    .assert()
    .success()
    .stderr(predicate::str::contains("changed (function)"));

  let code_uri = |doc: &str| doc.lines().find(|l| l.contains("CodeUri: file://")).unwrap().to_string();
  assert_ne!(code_uri(&env.read_file("first.yaml")), code_uri(&env.read_file("second.yaml")));
}

#[cfg(unix)]
#[test]
#[serial]
fn dependencies_are_installed_per_function() {
  let env = project();
  env.write_file("hello/requirements.txt", "requests==2.31.0\n");
  let pipenv = super::common::fake_pipenv(env.temp.path());
  let envs = env.temp.path().join("envs");

  env
    .possum_cmd()
    .args(["package", &env.destination()])
    .env("POSSUM_PIPENV", &pipenv)
    .env("FAKE_ENVS", &envs)
    .assert()
    .success();

  let archive = env.stored_objects().into_iter().find(|k| k.ends_with(".zip")).unwrap();
  let entries = archive_entries(&env.bucket_path().join(archive));
  assert!(entries.contains("requests/__init__.py"));
  assert!(entries.contains("requirements.txt"));
  assert!(!entries.iter().any(|e| e.starts_with("pip")));
  let leftover = std::fs::read_dir(&envs).map(|d| d.count()).unwrap_or(0);
  assert_eq!(leftover, 0);
}

#[test]
#[serial]
fn missing_dependency_tool_fails_without_output() {
  let env = project();
  env.write_file("hello/requirements.txt", "requests==2.31.0\n");

  env
    .possum_cmd()
    .args(["package", &env.destination(), "-o", "packaged.yaml"])
    .env("POSSUM_PIPENV", env.temp.path().join("missing-pipenv"))
    .assert()
    .failure();

  assert!(!env.project_path().join("packaged.yaml").exists());
  assert!(env.stored_objects().is_empty());
}
