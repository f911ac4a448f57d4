//! Container runtime driver
//!
//! The worker treats the container runtime as an external collaborator with
//! three operations: run (pull + create + start), stop (stop + remove) and
//! inspect. The [`ContainerRuntime`] trait is the seam; the production
//! implementation shells out to the docker CLI, and tests substitute a
//! scripted fake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::task::Task;
use std::collections::HashMap;
use std::process::Output;
use tracing::debug;

/// Errors surfaced by runtime operations. These never crash the worker's run
/// loop; they transition the affected task instead.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Failed to invoke container runtime: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Runtime command failed: {0}")]
    Command(String),

    #[error("Unexpected runtime output: {0}")]
    Output(String),
}

/// Container configuration derived from a task, handed to the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSpec {
    pub name: String,
    pub image: String,
    /// Fractional CPU cores. The runtime applies this as nanocores.
    pub cpu: f64,
    /// Memory limit in bytes.
    pub memory: i64,
    pub disk: i64,
    pub env: Vec<String>,
    pub exposed_ports: Vec<String>,
    pub port_bindings: HashMap<String, String>,
    pub network_mode: String,
    pub restart_policy: String,
}

impl RuntimeSpec {
    pub fn from_task(task: &Task) -> Self {
        Self {
            name: task.name.clone(),
            image: task.image.clone(),
            cpu: task.cpu,
            memory: task.memory,
            disk: task.disk,
            env: Vec::new(),
            exposed_ports: task.exposed_ports.clone(),
            port_bindings: task.port_bindings.clone(),
            network_mode: task.network_mode.clone(),
            restart_policy: task.restart_policy.clone(),
        }
    }
}

/// The runtime's view of a container, as returned by inspect.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ContainerView {
    /// Runtime status string, e.g. `running` or `exited`.
    pub status: String,
    /// Effective container-port to host-port bindings.
    pub host_ports: HashMap<String, String>,
}

/// The three operations the worker needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pulls the image, creates the container with the spec's resource
    /// limits and bindings, and starts it. Returns the container id.
    async fn run(&self, spec: &RuntimeSpec) -> Result<String, RuntimeError>;

    /// Stops and removes the container (volumes removed, not forced).
    async fn stop(&self, container_id: &str) -> Result<(), RuntimeError>;

    /// Returns the runtime's current view of the container.
    async fn inspect(&self, container_id: &str) -> Result<ContainerView, RuntimeError>;
}

/// Driver that shells out to the docker CLI.
///
/// `docker run -d` covers pull + create + start in one invocation; stop and
/// remove are issued separately so a stop failure leaves the container
/// inspectable.
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn invoke(&self, args: &[String]) -> Result<Output, RuntimeError> {
        debug!(binary = %self.binary, ?args, "Invoking container runtime");
        let output = tokio::process::Command::new(&self.binary)
            .args(args)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(RuntimeError::Command(format!(
                "{} {} exited with {}: {}",
                self.binary,
                args.first().map(String::as_str).unwrap_or(""),
                output.status,
                stderr
            )));
        }
        Ok(output)
    }

    fn run_args(&self, spec: &RuntimeSpec) -> Vec<String> {
        let mut args = vec!["run".to_string(), "-d".to_string()];
        if !spec.name.is_empty() {
            args.push("--name".to_string());
            args.push(spec.name.clone());
        }
        if spec.cpu > 0.0 {
            args.push(format!("--cpus={}", spec.cpu));
        }
        if spec.memory > 0 {
            args.push(format!("--memory={}b", spec.memory));
        }
        if !spec.restart_policy.is_empty() {
            args.push(format!("--restart={}", spec.restart_policy));
        }
        if !spec.network_mode.is_empty() {
            args.push(format!("--network={}", spec.network_mode));
        }
        for port in &spec.exposed_ports {
            args.push("--expose".to_string());
            args.push(port.clone());
        }
        for (container_port, host_port) in &spec.port_bindings {
            args.push("-p".to_string());
            args.push(format!("{}:{}", host_port, container_port));
        }
        args.push("--publish-all".to_string());
        for entry in &spec.env {
            args.push("-e".to_string());
            args.push(entry.clone());
        }
        args.push(spec.image.clone());
        args
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn run(&self, spec: &RuntimeSpec) -> Result<String, RuntimeError> {
        let output = self.invoke(&self.run_args(spec)).await?;
        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if container_id.is_empty() {
            return Err(RuntimeError::Output(
                "runtime did not report a container id".to_string(),
            ));
        }
        Ok(container_id)
    }

    async fn stop(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.invoke(&["stop".to_string(), container_id.to_string()])
            .await?;
        self.invoke(&[
            "rm".to_string(),
            "-v".to_string(),
            container_id.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerView, RuntimeError> {
        let output = self
            .invoke(&["inspect".to_string(), container_id.to_string()])
            .await?;

        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| RuntimeError::Output(format!("invalid inspect JSON: {}", e)))?;
        let container = parsed
            .get(0)
            .ok_or_else(|| RuntimeError::Output("empty inspect result".to_string()))?;

        let status = container
            .pointer("/State/Status")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let mut host_ports = HashMap::new();
        if let Some(ports) = container
            .pointer("/NetworkSettings/Ports")
            .and_then(|v| v.as_object())
        {
            for (container_port, bindings) in ports {
                if let Some(host_port) = bindings
                    .as_array()
                    .and_then(|b| b.first())
                    .and_then(|b| b.get("HostPort"))
                    .and_then(|v| v.as_str())
                {
                    host_ports.insert(container_port.clone(), host_port.to_string());
                }
            }
        }

        Ok(ContainerView { status, host_ports })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_carry_resource_limits() {
        let docker = DockerCli::new("docker");
        let mut task = Task::new("web", "nginx:latest");
        task.cpu = 0.5;
        task.memory = 256 * 1024 * 1024;
        task.restart_policy = "always".to_string();
        task.port_bindings
            .insert("80/tcp".to_string(), "8080".to_string());

        let args = docker.run_args(&RuntimeSpec::from_task(&task));
        assert!(args.contains(&"--cpus=0.5".to_string()));
        assert!(args.contains(&format!("--memory={}b", 256 * 1024 * 1024)));
        assert!(args.contains(&"--restart=always".to_string()));
        assert!(args.contains(&"8080:80/tcp".to_string()));
        assert_eq!(args.last().unwrap(), "nginx:latest");
    }
}
