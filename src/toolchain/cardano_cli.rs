//! Subprocess adapter for the node's command-line toolchain.

use super::{DraftTx, SignedTx, Signer, ToolchainError, TxToolchain, WorkDir};
use crate::domain::Lovelace;
use crate::engine::{TxOutput, TxPlan};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const PROTOCOL_PARAMS_FILE: &str = "protocol-params.json";
const PAYMENT_KEY_FILE: &str = "payment.skey";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet { magic: u32 },
}

impl Network {
    fn args(&self) -> Vec<String> {
        match self {
            Network::Mainnet => vec!["--mainnet".to_string()],
            Network::Testnet { magic } => vec!["--testnet-magic".to_string(), magic.to_string()],
        }
    }
}

/// Key material for one minting policy, relative to the keys directory.
#[derive(Debug, Clone)]
struct PolicyFiles {
    script: PathBuf,
    signing_key: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CardanoCli {
    cli_path: String,
    keys_dir: PathBuf,
    network: Network,
    policies: HashMap<String, PolicyFiles>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SignedEnvelope {
    #[serde(rename = "cborHex")]
    cbor_hex: String,
}

impl CardanoCli {
    pub fn new(cli_path: impl Into<String>, keys_dir: impl Into<PathBuf>, network: Network) -> Self {
        Self {
            cli_path: cli_path.into(),
            keys_dir: keys_dir.into(),
            network,
            policies: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Upper bound on a single toolchain invocation; the child is killed when it elapses.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a minting policy whose files are `<stem>.script` and `<stem>.skey`.
    pub fn with_policy(mut self, policy_id: &str, stem: &str) -> Self {
        self.policies.insert(
            policy_id.to_string(),
            PolicyFiles {
                script: self.keys_dir.join(format!("{}.script", stem)),
                signing_key: self.keys_dir.join(format!("{}.skey", stem)),
            },
        );
        self
    }

    fn policy(&self, policy_id: &str) -> Result<&PolicyFiles, ToolchainError> {
        self.policies
            .get(policy_id)
            .ok_or_else(|| ToolchainError::UnknownPolicy(policy_id.to_string()))
    }

    /// Arguments of `transaction build-raw` for `plan`.
    pub fn build_raw_args(
        &self,
        plan: &TxPlan,
        ttl: u64,
        out_file: &Path,
        metadata_file: Option<&Path>,
    ) -> Result<Vec<String>, ToolchainError> {
        let mut args = vec!["transaction".to_string(), "build-raw".to_string()];
        for input in &plan.inputs {
            args.push("--tx-in".to_string());
            args.push(input.output_ref.to_string());
        }
        for output in &plan.outputs {
            args.push("--tx-out".to_string());
            args.push(tx_out_arg(output));
        }
        args.push("--invalid-hereafter".to_string());
        args.push(ttl.to_string());
        args.push("--fee".to_string());
        args.push(plan.fee.to_string());
        args.push("--out-file".to_string());
        args.push(out_file.display().to_string());
        if let Some(metadata_file) = metadata_file {
            args.push("--metadata-json-file".to_string());
            args.push(metadata_file.display().to_string());
        }
        if !plan.mints.is_empty() {
            let mint = plan
                .mints
                .iter()
                .map(|m| format!("{} {}", m.quantity, m.unit()))
                .collect::<Vec<_>>()
                .join("+");
            args.push("--mint".to_string());
            args.push(mint);
            for asset in &plan.mints {
                args.push("--mint-script-file".to_string());
                args.push(self.policy(&asset.policy_id)?.script.display().to_string());
            }
        }
        Ok(args)
    }

    fn min_fee_args(&self, draft: &DraftTx) -> Vec<String> {
        vec![
            "transaction".to_string(),
            "calculate-min-fee".to_string(),
            "--tx-body-file".to_string(),
            draft.body_file.display().to_string(),
            "--tx-in-count".to_string(),
            draft.plan.inputs.len().to_string(),
            "--tx-out-count".to_string(),
            draft.plan.outputs.len().to_string(),
            "--witness-count".to_string(),
            draft.plan.witness_count.to_string(),
            "--byron-witness-count".to_string(),
            "0".to_string(),
            "--protocol-params-file".to_string(),
            self.keys_dir.join(PROTOCOL_PARAMS_FILE).display().to_string(),
        ]
    }

    fn sign_args(
        &self,
        draft: &DraftTx,
        signers: &[Signer],
        out_file: &Path,
    ) -> Result<Vec<String>, ToolchainError> {
        let mut args = vec![
            "transaction".to_string(),
            "sign".to_string(),
            "--tx-body-file".to_string(),
            draft.body_file.display().to_string(),
        ];
        for signer in signers {
            let key = match signer {
                Signer::Payment => self.keys_dir.join(PAYMENT_KEY_FILE),
                Signer::Policy(policy_id) => self.policy(policy_id)?.signing_key.clone(),
            };
            args.push("--signing-key-file".to_string());
            args.push(key.display().to_string());
        }
        args.push("--out-file".to_string());
        args.push(out_file.display().to_string());
        args.extend(self.network.args());
        Ok(args)
    }

    async fn run(&self, args: &[String]) -> Result<String, ToolchainError> {
        debug!(cli = %self.cli_path, ?args, "Running toolchain command");
        let command = args.iter().take(2).cloned().collect::<Vec<_>>().join(" ");
        let mut cmd = Command::new(&self.cli_path);
        cmd.args(args).kill_on_drop(true);
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(%command, after = ?self.timeout, "Toolchain command timed out");
                return Err(ToolchainError::Timeout {
                    command,
                    after: self.timeout,
                });
            }
        };
        if !output.status.success() {
            return Err(ToolchainError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// `<address>+<lovelace>[+<qty> <unit>]...`
fn tx_out_arg(output: &TxOutput) -> String {
    let mut arg = format!("{}+{}", output.address, output.lovelace);
    for asset in &output.assets {
        arg.push_str(&format!("+{} {}", asset.quantity, asset.unit()));
    }
    arg
}

/// The fee is the first token of output such as `171485 Lovelace`.
pub fn parse_fee(stdout: &str) -> Result<Lovelace, ToolchainError> {
    let token = stdout
        .split_whitespace()
        .next()
        .ok_or_else(|| ToolchainError::Parse("empty fee output".to_string()))?;
    token
        .parse::<u64>()
        .map(Lovelace::new)
        .map_err(|_| ToolchainError::Parse(format!("invalid fee: {}", token)))
}

/// Decode the `cborHex` field of a signed transaction envelope.
pub fn parse_signed(envelope: &str) -> Result<SignedTx, ToolchainError> {
    let parsed: SignedEnvelope =
        serde_json::from_str(envelope).map_err(|e| ToolchainError::Parse(e.to_string()))?;
    let cbor = hex::decode(parsed.cbor_hex.trim())
        .map_err(|e| ToolchainError::Parse(format!("invalid cborHex: {}", e)))?;
    Ok(SignedTx { cbor })
}

#[async_trait]
impl TxToolchain for CardanoCli {
    async fn build(
        &self,
        work: &WorkDir,
        name: &str,
        plan: &TxPlan,
        ttl: u64,
        metadata: Option<&serde_json::Value>,
    ) -> Result<DraftTx, ToolchainError> {
        let metadata_file = match metadata {
            Some(value) => {
                let path = work.file("metadata.json");
                let body = serde_json::to_vec(value).map_err(|e| ToolchainError::Parse(e.to_string()))?;
                tokio::fs::write(&path, body).await?;
                Some(path)
            }
            None => None,
        };
        let body_file = work.file(name);
        let args = self.build_raw_args(plan, ttl, &body_file, metadata_file.as_deref())?;
        self.run(&args).await?;
        info!(file = %body_file.display(), fee = %plan.fee, ttl, "Built transaction body");
        Ok(DraftTx {
            body_file,
            plan: plan.clone(),
            ttl,
        })
    }

    async fn min_fee(&self, draft: &DraftTx) -> Result<Lovelace, ToolchainError> {
        let stdout = self.run(&self.min_fee_args(draft)).await?;
        parse_fee(&stdout)
    }

    async fn sign(
        &self,
        work: &WorkDir,
        draft: &DraftTx,
        signers: &[Signer],
    ) -> Result<SignedTx, ToolchainError> {
        let out_file = work.file("tx.signed");
        let args = self.sign_args(draft, signers, &out_file)?;
        self.run(&args).await?;
        let envelope = tokio::fs::read_to_string(&out_file).await?;
        parse_signed(&envelope)
    }
}
