use async_trait::async_trait;
use resources::{
    objects::application::{Application, ApplicationPhase, ApplicationStatus},
    validation::{validate_object_meta_update, ErrorList, FieldError},
};

use super::validation::ApplicationValidator;
use crate::registry::{Context, RestStrategy, StoreError};

/// Create, update and delete behaviour for Applications.
pub struct ApplicationStrategy {
    validator: ApplicationValidator,
}

impl ApplicationStrategy {
    pub fn new(validator: ApplicationValidator) -> Self {
        ApplicationStrategy {
            validator,
        }
    }
}

#[async_trait]
impl RestStrategy<Application> for ApplicationStrategy {
    fn prepare_for_create(&self, app: &mut Application) {
        app.status = ApplicationStatus {
            phase: ApplicationPhase::New,
        };
    }

    /// Status is owned by [`ApplicationStatusStrategy`]; a changed item list
    /// sends the Application back to `Updating`.
    fn prepare_for_update(&self, app: &mut Application, old: &Application) {
        app.status = old.status.clone();
        if app.spec.items != old.spec.items && old.status.phase != ApplicationPhase::Terminating {
            app.status.phase = ApplicationPhase::Updating;
        }
    }

    async fn validate_create(&self, ctx: &Context, app: &Application) -> ErrorList {
        self.validator.validate(ctx, app).await
    }

    async fn validate_update(
        &self,
        _ctx: &Context,
        app: &Application,
        old: &Application,
    ) -> ErrorList {
        self.validator.validate_update(app, old)
    }

    fn allow_create_on_update(&self) -> bool {
        false
    }

    async fn before_delete(&self, _ctx: &Context, app: &Application) -> Result<(), StoreError> {
        tracing::debug!(
            "Deleting Application {}/{} with {} items in phase {}",
            app.metadata.namespace,
            app.metadata.name,
            app.spec.items.len(),
            app.status.phase
        );
        Ok(())
    }

    fn after_create(&self, app: &Application) {
        tracing::info!(
            "Application {}/{} created with {} items",
            app.metadata.namespace,
            app.metadata.name,
            app.spec.items.len()
        );
    }

    fn after_update(&self, app: &Application) {
        if app.status.phase == ApplicationPhase::Updating {
            tracing::info!(
                "Application {}/{} items changed",
                app.metadata.namespace,
                app.metadata.name
            );
        }
    }
}

/// Update path of the status subresource.
pub struct ApplicationStatusStrategy;

#[async_trait]
impl RestStrategy<Application> for ApplicationStatusStrategy {
    fn prepare_for_create(&self, _app: &mut Application) {}

    fn prepare_for_update(&self, app: &mut Application, old: &Application) {
        app.spec = old.spec.clone();
        app.metadata.labels = old.metadata.labels.clone();
        app.metadata.annotations = old.metadata.annotations.clone();
    }

    async fn validate_create(&self, _ctx: &Context, _app: &Application) -> ErrorList {
        ErrorList::from(vec![FieldError::forbidden(
            "status",
            "cannot create an Application through its status",
        )])
    }

    async fn validate_update(
        &self,
        _ctx: &Context,
        app: &Application,
        old: &Application,
    ) -> ErrorList {
        validate_object_meta_update(&app.metadata, &old.metadata)
    }

    fn allow_create_on_update(&self) -> bool {
        false
    }

    fn after_update(&self, app: &Application) {
        tracing::info!(
            "Application {}/{} is {}",
            app.metadata.namespace,
            app.metadata.name,
            app.status.phase
        );
    }
}
