//! Tests for `possum generate-requirements`.

use predicates::prelude::*;
use serial_test::serial;

use super::common::TestEnv;

#[test]
#[serial]
fn writes_pinned_requirements_next_to_handler() {
  let env = TestEnv::new();
  env.write_file(
    "template.yaml",
    r#"Resources:
  Fetch:
    Type: AWS::Serverless::Function
    Properties:
      CodeUri: fetch/
      Handler: app.handler
      Runtime: python3.12
"#,
  );
  env.write_file("Pipfile", "[packages]\nrequests = \"*\"\nboto3 = \"*\"\n");
  env.write_file(
    "Pipfile.lock",
    r#"{"default": {"requests": {"version": "==2.31.0"}, "boto3": {"version": "==1.34.0"}}}"#,
  );
  env.write_file("fetch/app.py", "import boto3\nimport requests\n");

  env
    .possum_cmd()
    .arg("generate-requirements")
    .assert()
    .success()
    .stderr(predicate::str::contains("Fetch: wrote"));

  assert_eq!(env.read_file("fetch/requirements.txt"), "requests==2.31.0\n");
}
