//! Budget guard (spec §4.3.1): enforces workspace/domain/rule daily USD
//! caps against the `FetchAttempt` ledger.

use chrono::Utc;
use chrono_tz::Tz;
use sentinel_domain::error::Result;
use sentinel_domain::model::ProviderKind;
use sentinel_domain::repo::FetchAttemptRepo;
use sentinel_domain::util::start_of_day_utc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct BudgetCaps {
    pub workspace_daily_usd: f64,
    pub domain_daily_usd: f64,
    pub rule_daily_usd: f64,
}

impl Default for BudgetCaps {
    fn default() -> Self {
        BudgetCaps {
            workspace_daily_usd: 10.00,
            domain_daily_usd: 2.00,
            rule_daily_usd: 0.50,
        }
    }
}

/// Current day-bucket spend and whether a paid provider may still be used.
#[derive(Debug, Clone, Copy)]
pub struct SpendStatus {
    pub workspace_spend: f64,
    pub domain_spend: f64,
    pub rule_spend: f64,
    pub can_spend_paid: bool,
    pub reason: Option<&'static str>,
}

pub struct BudgetGuard<'a> {
    repo: &'a dyn FetchAttemptRepo,
    caps: BudgetCaps,
}

impl<'a> BudgetGuard<'a> {
    pub fn new(repo: &'a dyn FetchAttemptRepo, caps: BudgetCaps) -> Self {
        Self { repo, caps }
    }

    /// `canSpend(provider)` (spec §4.3.1). Free providers are always
    /// admissible regardless of spend; paid providers are denied once any
    /// of the three caps would be exceeded by the day's spend so far.
    pub async fn can_spend(
        &self,
        provider: ProviderKind,
        workspace_id: Uuid,
        domain: &str,
        rule_id: Uuid,
    ) -> Result<SpendStatus> {
        let since = start_of_day_utc(Utc::now(), Tz::UTC);

        let workspace_attempts = self.repo.list_by_workspace_since(workspace_id, since).await?;
        let workspace_spend: f64 = workspace_attempts.iter().map(|a| a.cost_usd).sum();

        let domain_attempts = self.repo.list_by_domain_since(domain, since).await?;
        let domain_spend: f64 = domain_attempts.iter().map(|a| a.cost_usd).sum();

        let rule_spend: f64 = workspace_attempts
            .iter()
            .filter(|a| a.rule_id == Some(rule_id))
            .map(|a| a.cost_usd)
            .sum();

        if !provider.is_paid() {
            return Ok(SpendStatus {
                workspace_spend,
                domain_spend,
                rule_spend,
                can_spend_paid: true,
                reason: None,
            });
        }

        let (can_spend_paid, reason) = if workspace_spend >= self.caps.workspace_daily_usd {
            (false, Some("workspace daily budget exceeded"))
        } else if domain_spend >= self.caps.domain_daily_usd {
            (false, Some("domain daily budget exceeded"))
        } else if rule_spend >= self.caps.rule_daily_usd {
            (false, Some("rule daily budget exceeded"))
        } else {
            (true, None)
        };

        Ok(SpendStatus {
            workspace_spend,
            domain_spend,
            rule_spend,
            can_spend_paid,
            reason,
        })
    }
}
