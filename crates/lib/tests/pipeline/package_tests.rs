//! Packaging runs over multi-function projects.

use std::fs;

use possum_lib::cache::FingerprintCache;
use possum_lib::package::{PackageError, UnitDecision};

use super::common::{BASE_PACKAGES, Project, archive_entries, archive_file};

const TWO_FUNCTIONS: &str = r#"AWSTemplateFormatVersion: '2010-09-09'
Transform: AWS::Serverless-2016-10-31
Globals:
  Function:
    Runtime: python3.12
    Timeout: 10
Resources:
  A:
    Type: AWS::Serverless::Function
    Properties:
      CodeUri: a/
      Handler: app.handler
  B:
    Type: AWS::Serverless::Function
    Properties:
      CodeUri: b/
      Handler: app.handler
      Events:
        Api:
          Type: Api
          Properties:
            Path: /b
            Method: get
Outputs:
  BArn:
    Value: !GetAtt B.Arn
"#;

fn two_functions() -> Project {
  let project = Project::new(TWO_FUNCTIONS);
  project.write("a/app.py", "import requests\n");
  project.write("a/requirements.txt", "requests==2.31.0\n");
  project.write("b/app.py", "import requests\n");
  project.write("b/requirements.txt", "requests==2.28.0\nsix==1.16.0\n");
  project
}

#[tokio::test]
async fn second_unchanged_run_installs_and_uploads_nothing() {
  let project = two_functions();

  let tool = project.tool();
  let store = project.store();
  let first = project.run_with("run-1", false, &tool, &store).await.unwrap();
  assert_eq!(tool.installs.get(), 2);
  assert_eq!(store.keys.borrow().len(), 2);

  let tool = project.tool();
  let store = project.store();
  let second = project.run_with("run-2", false, &tool, &store).await.unwrap();

  assert_eq!(tool.installs.get(), 0);
  assert_eq!(second.installs, 0);
  assert!(store.keys.borrow().is_empty());
  assert_eq!(second.reused, vec!["A", "B"]);
  assert_eq!(first.descriptor.to_yaml().unwrap(), second.descriptor.to_yaml().unwrap());
}

#[tokio::test]
async fn units_get_only_their_own_dependency_versions() {
  let project = two_functions();
  let tool = project.tool();
  let outcome = project.run_with("run", false, &tool, &project.store()).await.unwrap();

  let a = project.object_path(&Project::location(&outcome, "A", "CodeUri"));
  let b = project.object_path(&Project::location(&outcome, "B", "CodeUri"));

  let a_entries = archive_entries(&a);
  assert!(a_entries.contains("requests-2.31.0.dist-info/METADATA"));
  assert!(!a_entries.iter().any(|e| e.starts_with("requests-2.28.0") || e.starts_with("six")));
  assert_eq!(archive_file(&a, "requests/__init__.py"), "2.31.0");

  let b_entries = archive_entries(&b);
  assert!(b_entries.contains("requests-2.28.0.dist-info/METADATA"));
  assert!(b_entries.contains("six/__init__.py"));
  assert_eq!(archive_file(&b, "requests/__init__.py"), "2.28.0");

  assert!(tool.live_envs.borrow().is_empty());
}

#[tokio::test]
async fn base_packages_never_reach_archives() {
  let project = two_functions();
  let outcome = project.run_with("run", false, &project.tool(), &project.store()).await.unwrap();

  for name in ["A", "B"] {
    let archive = project.object_path(&Project::location(&outcome, name, "CodeUri"));
    let entries = archive_entries(&archive);
    assert!(entries.contains("app.py"));
    assert!(entries.contains("requirements.txt"));
    for base in BASE_PACKAGES {
      assert!(!entries.iter().any(|e| e.starts_with(base)), "{base} leaked into {name}");
    }
  }
}

#[tokio::test]
async fn cached_unit_keeps_previous_uri_while_changed_unit_rebuilds() {
  let project = two_functions();

  let mut cache = FingerprintCache::open(&project.state_dir(), &project.dir()).unwrap();
  cache.check_and_update("A", &project.dir().join("a")).unwrap();
  cache.set_artifact_uri("A", "s3://bkt/prev/a.zip");
  cache.check_and_update("B", &project.dir().join("b")).unwrap();
  cache.set_artifact_uri("B", "s3://bkt/prev/b.zip");
  cache.save().unwrap();

  project.write("b/app.py", "import requests\nprint('changed')\n");

  let session = project.session("next", false);
  let decisions: Vec<_> = session.plan().iter().map(|u| u.decision.clone()).collect();
  assert_eq!(
    decisions,
    vec![
      UnitDecision::Reuse {
        uri: "s3://bkt/prev/a.zip".to_string()
      },
      UnitDecision::Changed,
    ]
  );

  let tool = project.tool();
  let store = project.store();
  let outcome = session.run(Some(&tool), &store).await.unwrap();

  assert_eq!(Project::location(&outcome, "A", "CodeUri"), "s3://bkt/prev/a.zip");
  let b_uri = Project::location(&outcome, "B", "CodeUri");
  let b_key = store.keys.borrow()[0].clone();
  assert!(b_key.starts_with("next/") && b_key.ends_with(".zip"));
  assert!(b_uri.ends_with(b_key.as_str()));
  assert_eq!(tool.installs.get(), 1);

  let cache = FingerprintCache::open(&project.state_dir(), &project.dir()).unwrap();
  assert_eq!(cache.get_artifact_uri("A"), Some("s3://bkt/prev/a.zip"));
  assert_eq!(cache.get_artifact_uri("B"), Some(b_uri.as_str()));
}

#[tokio::test]
async fn forced_run_rebuilds_everything_and_refreshes_hashes() {
  let project = two_functions();
  project.run_with("run-1", false, &project.tool(), &project.store()).await.unwrap();
  let before = FingerprintCache::open(&project.state_dir(), &project.dir()).unwrap();
  let old_a = before.entry("A").unwrap();

  project.write("a/app.py", "import requests\n# touched\n");

  let tool = project.tool();
  let store = project.store();
  let outcome = project.run_with("run-2", true, &tool, &store).await.unwrap();
  assert_eq!(outcome.rebuilt, vec!["A", "B"]);
  assert_eq!(tool.installs.get(), 2);

  let after = FingerprintCache::open(&project.state_dir(), &project.dir()).unwrap();
  let new_a = after.entry("A").unwrap();
  assert_ne!(old_a.last_hash, new_a.last_hash);
  assert_ne!(old_a.last_artifact_uri, new_a.last_artifact_uri);

  let session = project.session("run-3", false);
  assert!(session.plan().iter().all(|u| !u.decision.is_rebuild()));
}

#[tokio::test]
async fn renaming_a_file_forces_a_rebuild() {
  let project = two_functions();
  project.run_with("run-1", false, &project.tool(), &project.store()).await.unwrap();

  fs::rename(project.dir().join("a/app.py"), project.dir().join("a/main.py")).unwrap();

  let session = project.session("run-2", false);
  assert_eq!(session.plan()[0].decision, UnitDecision::Changed);
  assert!(!session.plan()[1].decision.is_rebuild());
}

#[tokio::test]
async fn non_python_functions_are_left_alone() {
  let template = r#"Resources:
  Py:
    Type: AWS::Serverless::Function
    Properties:
      CodeUri: py/
      Handler: app.handler
      Runtime: python3.11
  Node:
    Type: AWS::Serverless::Function
    Properties:
      CodeUri: node/
      Handler: index.handler
      Runtime: nodejs
"#;
  let project = Project::new(template);
  project.write("py/app.py", "");
  project.write("node/index.js", "");

  let outcome = project.run_with("run", false, &project.tool(), &project.store()).await.unwrap();

  assert_eq!(outcome.rebuilt, vec!["Py"]);
  assert_eq!(Project::location(&outcome, "Node", "CodeUri"), "node/");
  assert!(Project::location(&outcome, "Py", "CodeUri").starts_with("file://"));
  assert_eq!(outcome.descriptor.skipped().len(), 1);
}

#[tokio::test]
async fn failed_install_uploads_nothing_and_keeps_cache() {
  let project = two_functions();
  let mut tool = project.tool();
  tool.fail_install = true;
  let store = project.store();

  let err = project.run_with("run", false, &tool, &store).await.unwrap_err();

  assert!(matches!(err, PackageError::Dependency(_)));
  assert!(store.keys.borrow().is_empty());
  assert!(tool.live_envs.borrow().is_empty());
  assert!(!FingerprintCache::path_for(&project.state_dir(), &project.dir()).exists());
}

#[tokio::test]
async fn recorded_hash_without_artifact_still_rebuilds() {
  let project = two_functions();

  // A previous run recorded fingerprints but died before any artifact was stored.
  let mut cache = FingerprintCache::open(&project.state_dir(), &project.dir()).unwrap();
  cache.check_and_update("A", &project.dir().join("a")).unwrap();
  cache.check_and_update("B", &project.dir().join("b")).unwrap();
  cache.save().unwrap();

  let session = project.session("retry", false);
  let decisions: Vec<_> = session.plan().iter().map(|u| u.decision.clone()).collect();
  assert_eq!(decisions, vec![UnitDecision::NoPriorArtifact, UnitDecision::NoPriorArtifact]);
  assert!(session.plan().iter().all(|u| u.decision.is_rebuild()));

  let tool = project.tool();
  let store = project.store();
  let outcome = session.run(Some(&tool), &store).await.unwrap();

  assert_eq!(outcome.rebuilt, vec!["A", "B"]);
  assert_eq!(tool.installs.get(), 2);
  assert_eq!(store.keys.borrow().len(), 2);
  let cache = FingerprintCache::open(&project.state_dir(), &project.dir()).unwrap();
  assert_eq!(cache.get_artifact_uri("A"), Some(Project::location(&outcome, "A", "CodeUri").as_str()));
}

#[tokio::test]
async fn failed_upload_aborts_without_saving_cache() {
  let project = two_functions();
  project.run_with("run-1", false, &project.tool(), &project.store()).await.unwrap();
  let cache_path = FingerprintCache::path_for(&project.state_dir(), &project.dir());
  let saved = fs::read_to_string(&cache_path).unwrap();

  project.write("a/app.py", "import requests\nprint('a')\n");
  project.write("b/app.py", "import requests\nprint('b')\n");

  let mut store = project.store();
  store.fail_after = Some(1);
  let err = project.run_with("run-2", false, &project.tool(), &store).await.unwrap_err();

  assert!(matches!(err, PackageError::Upload(_)));
  assert_eq!(store.keys.borrow().len(), 1);
  assert_eq!(fs::read_to_string(&cache_path).unwrap(), saved);

  let tool = project.tool();
  let outcome = project.run_with("run-3", false, &tool, &project.store()).await.unwrap();
  assert_eq!(outcome.rebuilt, vec!["A", "B"]);
  assert_eq!(tool.installs.get(), 2);
}

#[tokio::test]
async fn unrelated_template_content_survives_rewriting() {
  let project = two_functions();
  let outcome = project.run_with("run", false, &project.tool(), &project.store()).await.unwrap();
  let yaml = outcome.descriptor.to_yaml().unwrap();

  assert!(yaml.contains("!GetAtt B.Arn"));
  assert!(yaml.contains("Timeout: 10"));
  assert!(yaml.contains("Path: /b"));
  assert!(yaml.find("  A:").unwrap() < yaml.find("  B:").unwrap());
}
