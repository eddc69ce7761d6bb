use std::sync::Arc;

use sqlx::PgPool;

use paperflow_core::auth::{AuthCrypto, StaffTokenKeys, TokenVault};
use paperflow_core::database::repositories::{
    ArtifactsRepository, AuditRepository, MappingsRepository, QueueRepository,
    SessionsRepository, StaffRepository,
};
use paperflow_core::extraction::ExtractionClient;
use paperflow_core::lms::MoodleClient;
use paperflow_core::notify::{LogNotifier, Notifier, SendGridNotifier, StudentNotifier};
use paperflow_core::storage::{ArtifactStore, FileStore};
use paperflow_core::submission::Orchestrator;
use paperflow_core::Result;

use crate::config::Config;

/// Application context threaded through every handler: database handle,
/// storage handle, LMS client, extraction client, and configuration.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub artifacts: ArtifactsRepository,
    pub staff: StaffRepository,
    pub sessions: SessionsRepository,
    pub mappings: MappingsRepository,
    pub audit: AuditRepository,
    pub queue: QueueRepository,
    pub store: ArtifactStore,
    pub lms: MoodleClient,
    pub extractor: ExtractionClient,
    pub crypto: Arc<AuthCrypto>,
    pub token_keys: StaffTokenKeys,
    pub vault: TokenVault,
    pub notifier: Arc<StudentNotifier>,
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub fn new(config: Arc<Config>, pool: PgPool) -> Result<Self> {
        let artifacts = ArtifactsRepository::new(pool.clone());
        let staff = StaffRepository::new(pool.clone());
        let sessions = SessionsRepository::new(pool.clone());
        let mappings = MappingsRepository::new(pool.clone());
        let audit = AuditRepository::new(pool.clone());
        let queue = QueueRepository::new(pool.clone());

        let store = ArtifactStore::new(FileStore::new(&config.upload_dir), pool.clone());
        let lms = MoodleClient::new(&config.moodle_base_url);
        let extractor = ExtractionClient::new(&config.hf_space_url);

        let vault = TokenVault::from_secret(&config.encryption_key)?;
        let token_keys = StaffTokenKeys::new(&config.secret_key);

        let mail: Arc<dyn Notifier> = if config.sendgrid_api_key.is_empty() {
            Arc::new(LogNotifier)
        } else {
            Arc::new(SendGridNotifier::new(
                &config.sendgrid_api_key,
                &config.email_from_email,
                &config.email_from_name,
            ))
        };
        let notifier = Arc::new(StudentNotifier::new(
            mappings.clone(),
            audit.clone(),
            lms.clone(),
            mail,
            config.moodle_admin_token.clone(),
        ));

        let orchestrator = Orchestrator::new(
            artifacts.clone(),
            mappings.clone(),
            sessions.clone(),
            queue.clone(),
            audit.clone(),
            store.clone(),
            lms.clone(),
            vault.clone(),
            notifier.clone(),
            config.staff_alert_email.clone(),
        );

        Ok(Self {
            config,
            pool,
            artifacts,
            staff,
            sessions,
            mappings,
            audit,
            queue,
            store,
            lms,
            extractor,
            crypto: Arc::new(AuthCrypto::new()),
            token_keys,
            vault,
            notifier,
            orchestrator,
        })
    }
}
