//! Image allocation, activation and deletion.

use chrono::Utc;

use crate::compute::{ComputeClient, ComputeError, ImageHandle, ImageOptions, ImageSnapshot};
use crate::poll::Poller;
use crate::reference::{ImageReference, ImageSpec, MachineSpec, SERVER_ID_KEY};

use super::{DRIVER_VERSION, Driver, LifecycleError};

const ACTIVE: &str = "ACTIVE";
const DELETED: &str = "DELETED";

fn is_active(image: &ImageSnapshot) -> bool {
    image.status == ACTIVE
}

/// Polls until `image` reports `ACTIVE`.
///
/// When `initial` is already active the call returns it without reading or
/// sleeping.
///
/// # Errors
///
/// Returns [`LifecycleError::ImageTimeout`] when the poller's budget is
/// spent, [`LifecycleError::Cancelled`] on cancellation, and
/// [`LifecycleError::Compute`] when the image disappears.
pub async fn wait_for_active(
    client: &dyn ComputeClient,
    image: &ImageHandle,
    driver_url: &str,
    poller: &Poller<'_>,
    initial: Option<ImageSnapshot>,
) -> Result<ImageSnapshot, LifecycleError> {
    if let Some(snapshot) = initial.as_ref().filter(|snapshot| is_active(snapshot)) {
        return Ok(snapshot.clone());
    }

    let snapshot = poller
        .wait_until_from(initial, || client.get_image(&image.id), is_active)
        .await
        .map_err(|err| {
            LifecycleError::from_poll(err, |timeout| LifecycleError::ImageTimeout {
                image_id: image.id.clone(),
                driver_url: driver_url.to_owned(),
                elapsed: timeout.elapsed,
                max_wait: timeout.max_wait,
                last_status: timeout.last_status,
                last_error: timeout.last_error,
            })
        })?;
    poller.report(&format!("Image {} is now ready", image.name));
    Ok(snapshot)
}

impl Driver {
    /// Reads the image recorded in `image`'s reference.
    ///
    /// Returns `Ok(None)` when the reference carries no image id or the
    /// provider no longer knows the image.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Reference`] for a malformed id and
    /// [`LifecycleError::Compute`] for other read failures.
    pub async fn image_for(&self, image: &ImageSpec) -> Result<Option<ImageSnapshot>, LifecycleError> {
        let Some(image_id) = image.reference.image_id()? else {
            return Ok(None);
        };
        match self.client.get_image(image_id).await {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(ComputeError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Snapshots `machine` into a new image named after `image` and records
    /// the result in `image.reference`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Conflict`] when the image already exists,
    /// [`LifecycleError::MissingReference`] when the machine has no
    /// `server_id`, and [`LifecycleError::Compute`] when creation fails. The
    /// reference is left untouched on error.
    pub async fn allocate_image(
        &self,
        image: &mut ImageSpec,
        machine: &MachineSpec,
        options: &ImageOptions,
    ) -> Result<ImageReference, LifecycleError> {
        if let Some(existing) = self.image_for(image).await? {
            return Err(LifecycleError::Conflict {
                name: image.name.clone(),
                image_id: existing.id,
            });
        }
        let server_id = machine
            .reference
            .server_id()?
            .ok_or_else(|| LifecycleError::missing_reference("machine", &machine.name, SERVER_ID_KEY))?;

        self.report(&format!(
            "Create image {} from machine {} with options {options:?}",
            image.name, machine.name
        ));
        let request = ImageOptions {
            description: options
                .description
                .clone()
                .or_else(|| Some(format!("The Image named '{}'", image.name))),
        };
        let image_id = self
            .client
            .create_image(server_id, &image.name, &request)
            .await?;
        tracing::info!(image = %image.name, %image_id, server = %server_id, "image requested");

        let reference = ImageReference {
            driver_url: self.driver_url.clone(),
            driver_version: DRIVER_VERSION.to_owned(),
            image_id,
            creator: self.creator.clone(),
            created_at: Utc::now().timestamp(),
        };
        image.reference = reference.to_map();
        Ok(reference)
    }

    /// Ensures the image recorded in `image` is `ACTIVE`, waiting when it is
    /// still being saved.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotFound`] when the image does not exist and
    /// the errors of [`wait_for_active`] otherwise.
    pub async fn ready_image(&self, image: &ImageSpec) -> Result<ImageSnapshot, LifecycleError> {
        let Some(snapshot) = self.image_for(image).await? else {
            return Err(LifecycleError::NotFound {
                resource: String::from("image"),
                name: image.name.clone(),
            });
        };
        if is_active(&snapshot) {
            self.report(&format!("Image {} is active!", image.name));
            return Ok(snapshot);
        }

        self.report("Waiting for image to be active ...");
        let handle = ImageHandle::new(snapshot.id.as_str(), image.name.as_str());
        let poller = self.poller(
            format!(
                "image {} ({} on {}) to be active",
                handle.name, handle.id, self.driver_url
            ),
            self.image_poll,
        );
        wait_for_active(
            self.client.as_ref(),
            &handle,
            &self.driver_url,
            &poller,
            Some(snapshot),
        )
        .await
    }

    /// Deletes the image recorded in `image` unless it is already gone.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Compute`] when the provider rejects the
    /// deletion.
    pub async fn destroy_image(&self, image: &ImageSpec) -> Result<(), LifecycleError> {
        let Some(snapshot) = self.image_for(image).await? else {
            tracing::info!(image = %image.name, "image already absent");
            return Ok(());
        };
        if snapshot.status == DELETED {
            tracing::info!(image = %image.name, image_id = %snapshot.id, "image already deleted");
            return Ok(());
        }
        match self.client.delete_image(&snapshot.id).await {
            Ok(()) | Err(ComputeError::NotFound { .. }) => {
                tracing::info!(image = %image.name, image_id = %snapshot.id, "image deleted");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}
