use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use super::TrafficSwitch;
use crate::error::{DeployError, Result};

pub const NAT_TABLE: &str = "nat";
pub const REDIRECT_CHAIN: &str = "OUTPUT";

static DPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--dport\s+(\d+)(?:\s|$)").unwrap());

static DESTINATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--to-destination\s+(\S+)").unwrap());

/// `-p tcp --dport <port> -j DNAT --to-destination <destination>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatRule {
    pub port: u16,
    pub destination: String,
}

impl NatRule {
    pub fn new(port: u16, destination: impl Into<String>) -> Self {
        Self {
            port,
            destination: destination.into(),
        }
    }

    pub fn args(&self) -> Vec<String> {
        vec![
            "-p".into(),
            "tcp".into(),
            "--dport".into(),
            self.port.to_string(),
            "-j".into(),
            "DNAT".into(),
            "--to-destination".into(),
            self.destination.clone(),
        ]
    }

    /// Parse one line of `iptables -S` output. Non-DNAT rules yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        if !line.contains("-j DNAT") || !line.contains("-p tcp") {
            return None;
        }
        let port = DPORT_RE.captures(line)?[1].parse().ok()?;
        let destination = DESTINATION_RE.captures(line)?[1].to_string();
        Some(Self { port, destination })
    }
}

/// Textual rule table: list a chain, insert or delete a rule by its spec.
#[async_trait]
pub trait RuleTable: Send + Sync {
    async fn list(&self, table: &str, chain: &str) -> Result<Vec<String>>;

    /// `position` is 1-based; 1 puts the rule ahead of everything else.
    async fn insert(&self, table: &str, chain: &str, position: u32, rule: &[String])
        -> Result<()>;

    /// Removes the first rule matching `rule`.
    async fn delete(&self, table: &str, chain: &str, rule: &[String]) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct IptablesCommand {
    program: String,
}

impl Default for IptablesCommand {
    fn default() -> Self {
        Self {
            program: "iptables".to_string(),
        }
    }
}

impl IptablesCommand {
    async fn run(&self, args: &[String]) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("-w")
            .args(args)
            .output()
            .await
            .map_err(|e| DeployError::Cutover(format!("failed to run {}: {e}", self.program)))?;
        if !output.status.success() {
            return Err(DeployError::Cutover(format!(
                "{} {} failed (exit {}): {}",
                self.program,
                args.join(" "),
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl RuleTable for IptablesCommand {
    async fn list(&self, table: &str, chain: &str) -> Result<Vec<String>> {
        let args = ["-t", table, "-S", chain].map(String::from);
        let output = self.run(&args).await?;
        Ok(output
            .lines()
            .filter(|l| l.starts_with("-A "))
            .map(str::to_string)
            .collect())
    }

    async fn insert(
        &self,
        table: &str,
        chain: &str,
        position: u32,
        rule: &[String],
    ) -> Result<()> {
        let mut args: Vec<String> = ["-t", table, "-I", chain].map(String::from).to_vec();
        args.push(position.to_string());
        args.extend_from_slice(rule);
        self.run(&args).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, chain: &str, rule: &[String]) -> Result<()> {
        let mut args: Vec<String> = ["-t", table, "-D", chain].map(String::from).to_vec();
        args.extend_from_slice(rule);
        self.run(&args).await?;
        Ok(())
    }
}

/// Kernel DNAT strategy.
///
/// Cutover inserts the new redirect at the head of the chain and only then
/// deletes the rules that existed before it. Rules are first-match, so from
/// the moment of insertion new connections reach the new slot even while
/// the old rule is still present. Failed deletions leave a shadowed rule
/// that the next cutover removes.
pub struct KernelRuleSwitch {
    table: Arc<dyn RuleTable>,
    target_host: String,
}

impl KernelRuleSwitch {
    pub fn new(table: Arc<dyn RuleTable>, target_host: &str) -> Self {
        Self {
            table,
            target_host: target_host.to_string(),
        }
    }

    fn destination(&self, port: u16) -> String {
        format!("{}:{port}", self.target_host)
    }
}

#[async_trait]
impl TrafficSwitch for KernelRuleSwitch {
    async fn cutover(&self, listen_port: u16, new_target: u16, old_target: u16) -> Result<()> {
        let existing: Vec<NatRule> = self
            .table
            .list(NAT_TABLE, REDIRECT_CHAIN)
            .await?
            .iter()
            .filter_map(|line| NatRule::parse(line))
            .filter(|rule| rule.port == listen_port)
            .collect();

        let new_rule = NatRule::new(listen_port, self.destination(new_target));
        self.table
            .insert(NAT_TABLE, REDIRECT_CHAIN, 1, &new_rule.args())
            .await?;
        tracing::info!(listen_port, destination = %new_rule.destination, "redirect rule inserted");

        let old_destination = self.destination(old_target);
        for rule in existing {
            match self.table.delete(NAT_TABLE, REDIRECT_CHAIN, &rule.args()).await {
                Ok(()) => tracing::info!(
                    listen_port,
                    destination = %rule.destination,
                    stale = rule.destination != old_destination,
                    "redirect rule removed"
                ),
                Err(e) => tracing::warn!(
                    listen_port,
                    destination = %rule.destination,
                    "failed to remove redirect rule, leaving it shadowed: {e}"
                ),
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "iptables"
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeRuleTable, Op};
    use super::*;

    #[test]
    fn parse_iptables_save_line() {
        let rule = NatRule::parse(
            "-A OUTPUT -p tcp -m tcp --dport 8080 -j DNAT --to-destination 127.0.0.1:8081",
        )
        .unwrap();
        assert_eq!(rule, NatRule::new(8080, "127.0.0.1:8081"));
    }

    #[test]
    fn parse_requires_exact_port() {
        let rule = NatRule::parse(
            "-A OUTPUT -p tcp -m tcp --dport 18080 -j DNAT --to-destination 127.0.0.1:8081",
        )
        .unwrap();
        assert_eq!(rule.port, 18080);
        assert_ne!(rule.port, 8080);
    }

    #[test]
    fn parse_skips_other_rules() {
        assert!(NatRule::parse("-P OUTPUT ACCEPT").is_none());
        assert!(NatRule::parse("-A OUTPUT -p tcp --dport 80 -j REDIRECT --to-ports 81").is_none());
        assert!(NatRule::parse("-A OUTPUT -p udp --dport 53 -j DNAT --to-destination 1.1.1.1:53")
            .is_none());
    }

    #[test]
    fn args_round_trip_through_parse() {
        let rule = NatRule::new(80, "127.0.0.1:8082");
        assert_eq!(NatRule::parse(&rule.args().join(" ")), Some(rule));
    }

    #[tokio::test]
    async fn cutover_routes_to_new_target_only() {
        let table = Arc::new(FakeRuleTable::with_rules(&[
            NatRule::new(9999, "127.0.0.1:1"),
            NatRule::new(8080, "127.0.0.1:8081"),
        ]));
        let switch = KernelRuleSwitch::new(table.clone(), "127.0.0.1");

        switch.cutover(8080, 8082, 8081).await.unwrap();

        assert_eq!(table.route(8080).as_deref(), Some("127.0.0.1:8082"));
        assert_eq!(table.rules_for(8080), vec![NatRule::new(8080, "127.0.0.1:8082")]);
        assert_eq!(table.rules_for(9999).len(), 1);
    }

    #[tokio::test]
    async fn insert_precedes_delete_and_wins_first_match() {
        let table = Arc::new(FakeRuleTable::with_rules(&[NatRule::new(
            8080,
            "127.0.0.1:8081",
        )]));
        let switch = KernelRuleSwitch::new(table.clone(), "127.0.0.1");

        switch.cutover(8080, 8082, 8081).await.unwrap();

        assert_eq!(
            *table.ops.lock().unwrap(),
            vec![
                Op::List,
                Op::Insert(1, "127.0.0.1:8082".into()),
                Op::Delete("127.0.0.1:8081".into()),
            ]
        );
        // While both rules coexisted, the new one already answered first.
        assert_eq!(
            *table.route_after_insert.lock().unwrap(),
            vec![Some("127.0.0.1:8082".to_string())]
        );
    }

    #[tokio::test]
    async fn first_cutover_with_empty_chain() {
        let table = Arc::new(FakeRuleTable::default());
        let switch = KernelRuleSwitch::new(table.clone(), "127.0.0.1");

        switch.cutover(8080, 8082, 8081).await.unwrap();

        assert_eq!(table.rules_for(8080), vec![NatRule::new(8080, "127.0.0.1:8082")]);
    }

    #[tokio::test]
    async fn failed_delete_is_not_fatal_and_is_cleaned_up_later() {
        let mut table = FakeRuleTable::with_rules(&[NatRule::new(8080, "127.0.0.1:8081")]);
        table.fail_deletes = true;
        let table = Arc::new(table);
        let switch = KernelRuleSwitch::new(table.clone(), "127.0.0.1");

        switch.cutover(8080, 8082, 8081).await.unwrap();
        assert_eq!(table.route(8080).as_deref(), Some("127.0.0.1:8082"));
        assert_eq!(table.rules_for(8080).len(), 2);

        let rules = table.rules.lock().unwrap().clone();
        let table = Arc::new(FakeRuleTable::default());
        *table.rules.lock().unwrap() = rules;
        let switch = KernelRuleSwitch::new(table.clone(), "127.0.0.1");

        switch.cutover(8080, 8081, 8082).await.unwrap();
        assert_eq!(table.rules_for(8080), vec![NatRule::new(8080, "127.0.0.1:8081")]);
    }

    #[tokio::test]
    async fn stale_rules_go_with_the_old_one() {
        let table = Arc::new(FakeRuleTable::with_rules(&[
            NatRule::new(8080, "127.0.0.1:8083"),
            NatRule::new(8080, "127.0.0.1:8081"),
        ]));
        let switch = KernelRuleSwitch::new(table.clone(), "127.0.0.1");

        switch.cutover(8080, 8082, 8081).await.unwrap();

        assert_eq!(table.rules_for(8080), vec![NatRule::new(8080, "127.0.0.1:8082")]);
        assert_eq!(
            *table.ops.lock().unwrap(),
            vec![
                Op::List,
                Op::Insert(1, "127.0.0.1:8082".into()),
                Op::Delete("127.0.0.1:8083".into()),
                Op::Delete("127.0.0.1:8081".into()),
            ]
        );
    }

    #[tokio::test]
    async fn repeated_cutover_to_same_target_leaves_one_rule() {
        let table = Arc::new(FakeRuleTable::with_rules(&[NatRule::new(
            8080,
            "127.0.0.1:8082",
        )]));
        let switch = KernelRuleSwitch::new(table.clone(), "127.0.0.1");

        switch.cutover(8080, 8082, 8081).await.unwrap();

        assert_eq!(table.rules_for(8080), vec![NatRule::new(8080, "127.0.0.1:8082")]);
    }

    #[tokio::test]
    async fn insert_failure_is_fatal_and_leaves_chain_untouched() {
        let mut table = FakeRuleTable::with_rules(&[NatRule::new(8080, "127.0.0.1:8081")]);
        table.fail_inserts = true;
        let table = Arc::new(table);
        let switch = KernelRuleSwitch::new(table.clone(), "127.0.0.1");

        let err = switch.cutover(8080, 8082, 8081).await.unwrap_err();
        assert!(matches!(err, DeployError::Cutover(_)));
        assert_eq!(table.rules_for(8080), vec![NatRule::new(8080, "127.0.0.1:8081")]);
    }
}
