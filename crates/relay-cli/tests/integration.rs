#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

fn relay(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ses-relay").unwrap();
    cmd.current_dir(dir.path())
        .env("RELAY_ROOT", dir.path())
        .env_remove("RELAY_CONFIG")
        .env_remove("AWS_REGION")
        .env_remove("AWS_DEFAULT_REGION");
    cmd
}

/// An initialized project with a minimal build context.
fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    relay(&dir).arg("init").assert().success();
    std::fs::create_dir_all(dir.path().join("container")).unwrap();
    std::fs::write(
        dir.path().join("container/Dockerfile"),
        "FROM public.ecr.aws/docker/library/alpine:3\nRUN apk add postfix\n",
    )
    .unwrap();
    dir
}

fn read_json(path: &std::path::Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

// ---------------------------------------------------------------------------
// ses-relay init
// ---------------------------------------------------------------------------

#[test]
fn init_writes_default_config() {
    let dir = TempDir::new().unwrap();
    relay(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("created: relay.yaml"));
    let content = std::fs::read_to_string(dir.path().join("relay.yaml")).unwrap();
    assert!(content.contains("SESRELAY"));
    assert!(content.contains("10.21.0.0/16"));
}

#[test]
fn init_keeps_existing_config() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("relay.yaml"), "app:\n  name: MYRELAY\n").unwrap();
    relay(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:  relay.yaml"));
    let content = std::fs::read_to_string(dir.path().join("relay.yaml")).unwrap();
    assert_eq!(content, "app:\n  name: MYRELAY\n");
}

// ---------------------------------------------------------------------------
// ses-relay config
// ---------------------------------------------------------------------------

#[test]
fn commands_require_init() {
    let dir = TempDir::new().unwrap();
    relay(&dir)
        .arg("synth")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

#[test]
fn config_show_fills_defaults() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("relay.yaml"), "relay:\n  smtp_port: 2525\n").unwrap();
    let out = relay(&dir)
        .args(["config", "show", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let cfg: Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(cfg["relay"]["smtp_port"], 2525);
    assert_eq!(cfg["app"]["name"], "SESRELAY");
    assert_eq!(cfg["task"]["build_platform"], "linux/arm64");
}

#[test]
fn config_validate_default_passes() {
    let dir = project();
    relay(&dir).args(["config", "validate"]).assert().success();
}

#[test]
fn config_validate_reports_errors() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("relay.yaml"),
        "load_balancer:\n  allowed_clients: ['10.0.0.1/8']\n",
    )
    .unwrap();
    relay(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error] allowed client '10.0.0.1/8'"))
        .stderr(predicate::str::contains("config validation found errors"));
}

#[test]
fn unknown_config_keys_fail_to_load() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("relay.yaml"), "relay:\n  smtp_prot: 25\n").unwrap();
    relay(&dir)
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn explicit_config_path() {
    let dir = project();
    let alt = dir.path().join("staging.yaml");
    std::fs::write(&alt, "app:\n  name: STAGINGRELAY\n").unwrap();
    relay(&dir)
        .args(["synth", "--config"])
        .arg(&alt)
        .assert()
        .success();
    assert!(dir
        .path()
        .join("relay.out/STAGINGRELAY.template.json")
        .exists());
}

// ---------------------------------------------------------------------------
// ses-relay synth
// ---------------------------------------------------------------------------

#[test]
fn synth_writes_template_and_assets() {
    let dir = project();
    relay(&dir)
        .arg("synth")
        .assert()
        .success()
        .stdout(predicate::str::contains("AWS::ECS::Service"))
        .stdout(predicate::str::contains("SESRELAY.template.json"));

    let template = read_json(&dir.path().join("relay.out/SESRELAY.template.json"));
    assert_eq!(template["AWSTemplateFormatVersion"], "2010-09-09");
    assert_eq!(template["Description"], "FargateSESRelay (version 0.1)");
    assert_eq!(template["Resources"]["Nlb"]["Properties"]["Scheme"], "internal");
    assert_eq!(template["Resources"]["NlbListener"]["Properties"]["Port"], 25);
    assert!(template["Outputs"]["LoadBalancerDNS"].is_object());

    let assets = read_json(&dir.path().join("relay.out/SESRELAY.assets.json"));
    let images = assets["dockerImages"].as_object().unwrap();
    assert_eq!(images.len(), 1);
    let image = images.values().next().unwrap();
    assert_eq!(image["source"]["platform"], "linux/arm64");
}

#[test]
fn synth_is_deterministic() {
    let dir = project();
    let path = dir.path().join("relay.out/SESRELAY.template.json");
    relay(&dir).arg("synth").assert().success();
    let first = std::fs::read_to_string(&path).unwrap();
    relay(&dir).arg("synth").assert().success();
    assert_eq!(first, std::fs::read_to_string(&path).unwrap());
}

#[test]
fn synth_custom_out_dir_and_json() {
    let dir = project();
    let out = relay(&dir)
        .args(["synth", "--out", "build/cfn", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let summary: Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(summary["stack"], "SESRELAY");
    assert_eq!(summary["image_tag"].as_str().unwrap().len(), 64);
    assert!(dir.path().join("build/cfn/SESRELAY.template.json").exists());
}

#[test]
fn synth_refuses_invalid_config() {
    let dir = project();
    std::fs::write(dir.path().join("relay.yaml"), "task:\n  cpu: 1000\n").unwrap();
    relay(&dir)
        .arg("synth")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--skip-validation"));
    assert!(!dir.path().join("relay.out").exists());

    relay(&dir)
        .args(["synth", "--skip-validation"])
        .assert()
        .success();
    let template = read_json(&dir.path().join("relay.out/SESRELAY.template.json"));
    assert_eq!(
        template["Resources"]["TaskDefinition"]["Properties"]["Cpu"],
        "1000"
    );
}

#[test]
fn synth_with_image_tag_needs_no_build_context() {
    let dir = TempDir::new().unwrap();
    relay(&dir).arg("init").assert().success();
    relay(&dir).arg("synth").assert().failure();
    relay(&dir)
        .args(["synth", "--image-tag", "release-7"])
        .assert()
        .success();
    let template = read_json(&dir.path().join("relay.out/SESRELAY.template.json"));
    let image = &template["Resources"]["TaskDefinition"]["Properties"]["ContainerDefinitions"][0]
        ["Image"]["Fn::Sub"];
    assert!(image.as_str().unwrap().ends_with("/ses-relay:release-7"));
}

#[test]
fn public_relay_synthesizes_internet_facing() {
    let dir = project();
    std::fs::write(
        dir.path().join("relay.yaml"),
        "load_balancer:\n  public: true\n  allowed_clients: ['198.51.100.0/24']\n\
         relay:\n  helo:\n    allowed_domains: [example.com]\n",
    )
    .unwrap();
    relay(&dir).arg("synth").assert().success();
    let template = read_json(&dir.path().join("relay.out/SESRELAY.template.json"));
    let nlb = &template["Resources"]["Nlb"];
    assert_eq!(nlb["Properties"]["Scheme"], "internet-facing");
    assert!(!nlb["DependsOn"].as_array().unwrap().is_empty());
    let ingress = &template["Resources"]["NlbSecurityGroup"]["Properties"]["SecurityGroupIngress"];
    assert_eq!(ingress.as_array().unwrap().len(), 1);
    assert_eq!(ingress[0]["CidrIp"], "198.51.100.0/24");
}

#[test]
fn clients_default_to_the_configured_vpc_range() {
    let dir = project();
    std::fs::write(dir.path().join("relay.yaml"), "network:\n  vpc_cidr: 10.50.0.0/16\n").unwrap();
    relay(&dir).arg("synth").assert().success();
    let template = read_json(&dir.path().join("relay.out/SESRELAY.template.json"));
    let ingress = &template["Resources"]["NlbSecurityGroup"]["Properties"]["SecurityGroupIngress"];
    assert_eq!(ingress.as_array().unwrap().len(), 1);
    assert_eq!(ingress[0]["CidrIp"], "10.50.0.0/16");
    let env = template["Resources"]["TaskDefinition"]["Properties"]["ContainerDefinitions"][0]
        ["Environment"]
        .as_array()
        .unwrap()
        .clone();
    let clients = env.iter().find(|e| e["Name"] == "ALLOWED_CLIENTS").unwrap();
    assert_eq!(clients["Value"], "10.50.0.0/16");
}

#[test]
fn oversized_zone_count_fails_cleanly() {
    let dir = project();
    std::fs::write(
        dir.path().join("relay.yaml"),
        "network:\n  max_azs: 18446744073709551615\n",
    )
    .unwrap();
    relay(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("cannot hold"));
    relay(&dir)
        .args(["synth", "--skip-validation"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("cannot carve"));
}

// ---------------------------------------------------------------------------
// ses-relay graph / image
// ---------------------------------------------------------------------------

#[test]
fn graph_orders_service_after_listener() {
    let dir = project();
    let out = relay(&dir)
        .args(["graph", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let entries: Vec<Value> = serde_json::from_slice(&out).unwrap();
    let pos = |id: &str| entries.iter().position(|e| e["id"] == id).unwrap();
    assert!(pos("NlbListener") < pos("Service"));
    assert!(pos("Vpc") < pos("VpcPrivateSubnet1"));
    let service = &entries[pos("Service")];
    assert!(service["depends_on"]
        .as_array()
        .unwrap()
        .iter()
        .any(|d| d == "NlbListener"));
}

#[test]
fn graph_table_lists_resources() {
    let dir = project();
    relay(&dir)
        .arg("graph")
        .assert()
        .success()
        .stdout(predicate::str::contains("DEPENDS ON"))
        .stdout(predicate::str::contains("ScalableTarget"));
}

#[test]
fn image_build_dry_run_prints_command() {
    let dir = project();
    relay(&dir)
        .args(["image", "build", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("build --platform linux/arm64"))
        .stdout(predicate::str::contains("--build-arg POSTFIX_SMTP_PORT=25"))
        .stdout(predicate::str::contains("-t ses-relay:"));
}

#[test]
fn image_push_dry_run_targets_the_template_image() {
    let dir = project();
    let out = relay(&dir)
        .args([
            "image",
            "push",
            "--dry-run",
            "--json",
            "--account",
            "123456789012",
            "--region",
            "eu-west-1",
            "--create-repository",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let plan: Value = serde_json::from_slice(&out).unwrap();
    let image = plan["image"].as_str().unwrap();
    assert!(image.starts_with("123456789012.dkr.ecr.eu-west-1.amazonaws.com/ses-relay:"));

    let commands: Vec<&str> = plan["commands"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c.as_str().unwrap())
        .collect();
    assert!(commands[0].starts_with("aws ecr describe-repositories --region eu-west-1"));
    assert!(commands[1].starts_with("aws ecr create-repository --region eu-west-1"));
    assert!(commands[2].contains(" build --platform linux/arm64"));
    assert!(commands[3].starts_with("aws ecr get-login-password --region eu-west-1 | "));
    assert!(commands[3].ends_with(
        "login --username AWS --password-stdin 123456789012.dkr.ecr.eu-west-1.amazonaws.com"
    ));
    assert!(commands[4].ends_with(&format!(" {image}")));
    assert!(commands.last().unwrap().ends_with(&format!("push {image}")));

    // The tag is the one synth writes into the task definition.
    relay(&dir).arg("synth").assert().success();
    let template = read_json(&dir.path().join("relay.out/SESRELAY.template.json"));
    let uri = template["Resources"]["TaskDefinition"]["Properties"]["ContainerDefinitions"][0]
        ["Image"]["Fn::Sub"]
        .as_str()
        .unwrap();
    let tag = image.rsplit(':').next().unwrap();
    assert!(uri.ends_with(&format!("/ses-relay:{tag}")));
}

#[test]
fn image_push_needs_a_region() {
    let dir = project();
    relay(&dir)
        .args(["image", "push", "--dry-run", "--account", "123456789012"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no region"));
}
