/// Teams, membership, and invite admission control.
///
/// Team creation is a single transaction (team row + owner membership).
/// The invite path layers three defenses: a distributed per-(team, user)
/// lock against concurrent invites, the circuit-broken email send, and the
/// membership primary key as the final duplicate backstop when the lock is
/// bypassed during a KV outage.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tracing::warn;

use taskhive_shared::email::InviteSender;
use taskhive_shared::lock::DistLock;
use taskhive_shared::metrics::{DegradedComponent, Metrics};
use taskhive_shared::models::{Team, TeamMember, TeamRole};
use taskhive_shared::models::user::User;
use taskhive_shared::Error;

pub struct TeamService {
    pool: PgPool,
    mailer: Option<Arc<dyn InviteSender>>,
    locker: Arc<DistLock>,
    invite_lock_ttl: Duration,
    metrics: Arc<Metrics>,
}

impl TeamService {
    pub fn new(
        pool: PgPool,
        mailer: Option<Arc<dyn InviteSender>>,
        locker: Arc<DistLock>,
        invite_lock_ttl: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            pool,
            mailer,
            locker,
            invite_lock_ttl,
            metrics,
        }
    }

    /// Creates a team and its owner membership atomically: either both
    /// rows exist afterwards or neither does.
    pub async fn create_team(&self, user_id: i64, name: &str) -> Result<i64, Error> {
        let mut tx = self.pool.begin().await?;
        let team_id = Team::create_tx(&mut *tx, name, user_id).await?;
        TeamMember::add_tx(&mut *tx, team_id, user_id, TeamRole::Owner).await?;
        tx.commit().await?;
        Ok(team_id)
    }

    pub async fn list_teams(&self, user_id: i64) -> Result<Vec<Team>, Error> {
        Ok(Team::list_by_user(&self.pool, user_id).await?)
    }

    /// The caller's role in the team: not-found when the team is missing,
    /// forbidden when the caller is not a member.
    pub async fn ensure_member_role(&self, team_id: i64, user_id: i64) -> Result<TeamRole, Error> {
        Team::find_by_id(&self.pool, team_id)
            .await?
            .ok_or(Error::NotFound)?;
        TeamMember::role(&self.pool, team_id, user_id)
            .await?
            .ok_or(Error::Forbidden)
    }

    /// Invites an existing user into a team by email.
    ///
    /// Protocol: resolve team → inviter role → role matrix → target user →
    /// distributed lock → duplicate check → email send → membership
    /// insert. A held lock is a conflict; a lock-store error bypasses the
    /// lock (the membership PK still catches duplicates). Email delivery
    /// failure, including an open circuit, is `Unavailable` and no
    /// membership row is written.
    pub async fn invite_by_email(
        &self,
        inviter_id: i64,
        team_id: i64,
        email: &str,
        target_role: TeamRole,
    ) -> Result<(), Error> {
        let team = Team::find_by_id(&self.pool, team_id)
            .await?
            .ok_or(Error::NotFound)?;

        let inviter_role = TeamMember::role(&self.pool, team_id, inviter_id)
            .await?
            .ok_or(Error::Forbidden)?;
        if !can_invite(inviter_role, target_role) {
            return Err(Error::Forbidden);
        }

        let user = User::find_by_email(&self.pool, email)
            .await?
            .ok_or(Error::NotFound)?;

        let lock_key = format!("lock:invite:{team_id}:{}", user.id);
        let lock_token = match self.locker.acquire(&lock_key, self.invite_lock_ttl).await {
            Ok(Some(token)) => Some(token),
            Ok(None) => return Err(Error::Conflict),
            Err(err) => {
                warn!(
                    component = "lock",
                    team_id,
                    user_id = user.id,
                    error = %err,
                    "invite lock acquire failed, bypassing"
                );
                self.metrics.record_redis_degraded(DegradedComponent::Lock);
                None
            }
        };

        let result = self
            .invite_locked(&team.name, team_id, user.id, email, target_role)
            .await;

        // Release on a detached task so neither request cancellation nor
        // shutdown can skip it; the TTL covers the crash case.
        if let Some(token) = lock_token {
            let locker = Arc::clone(&self.locker);
            tokio::spawn(async move {
                locker.release(&lock_key, &token).await;
            });
        }

        result
    }

    async fn invite_locked(
        &self,
        team_name: &str,
        team_id: i64,
        user_id: i64,
        email: &str,
        role: TeamRole,
    ) -> Result<(), Error> {
        if TeamMember::is_member(&self.pool, team_id, user_id).await? {
            return Err(Error::Conflict);
        }

        // Send first, insert second: a membership row must never exist for
        // an invite that was not delivered.
        if let Some(mailer) = self.mailer.as_ref() {
            if let Err(err) = mailer.send_invite(email, team_name).await {
                warn!(team_id, user_id, error = %err, "invite email failed");
                return Err(Error::Unavailable);
            }
        }

        TeamMember::add(&self.pool, team_id, user_id, role)
            .await
            .map_err(Error::from_db_conflict)
    }
}

/// Invite authorization matrix: owners invite members and admins, admins
/// invite members, members invite nobody.
pub fn can_invite(inviter: TeamRole, target: TeamRole) -> bool {
    match inviter {
        TeamRole::Owner => matches!(target, TeamRole::Member | TeamRole::Admin),
        TeamRole::Admin => matches!(target, TeamRole::Member),
        TeamRole::Member => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_matrix_holds_exactly() {
        use TeamRole::*;
        let cases = [
            (Owner, Member, true),
            (Owner, Admin, true),
            (Owner, Owner, false),
            (Admin, Member, true),
            (Admin, Admin, false),
            (Admin, Owner, false),
            (Member, Member, false),
            (Member, Admin, false),
            (Member, Owner, false),
        ];
        for (inviter, target, expected) in cases {
            assert_eq!(
                can_invite(inviter, target),
                expected,
                "{inviter:?} inviting {target:?}"
            );
        }
    }
}
