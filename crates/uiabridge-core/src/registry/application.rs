//! `uia.application.*` handlers.

use tracing::debug;

use super::{Method, Registry};
use crate::error::BridgeError;
use crate::host::AppRef;
use crate::protocol::{Params, Reply};

/// Application functions callable through `uia.application.function`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApplicationFunction {
    BundleId,
    Version,
    InterfaceOrientation,
    Name,
    Label,
}

impl ApplicationFunction {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "bundleID" => Some(Self::BundleId),
            "version" => Some(Self::Version),
            "interfaceOrientation" => Some(Self::InterfaceOrientation),
            "name" => Some(Self::Name),
            "label" => Some(Self::Label),
            _ => None,
        }
    }
}

impl Registry {
    pub(super) async fn application_method(&mut self, method: Method, p: Params<'_>) -> Result<Reply, BridgeError> {
        let app = self.target.front_most_app().await?;
        match method {
            Method::ApplicationFunction => {
                let name = p.str(0)?;
                call_application_function(&app, name).await
            }
            Method::ApplicationGetMainWindow => {
                let window = app.main_window().await?;
                Ok(Reply::value(window.and_then(|w| self.put(w))))
            }
            Method::ApplicationGetInterfaceOrientation => Ok(Reply::value(app.interface_orientation().await?)),
            Method::ApplicationGetBundleId => Ok(Reply::value(app.bundle_id().await?)),
            Method::ApplicationGetVersion => Ok(Reply::value(app.version().await?)),
            other => Err(BridgeError::UnknownMethod(other.name().to_string())),
        }
    }
}

async fn call_application_function(app: &AppRef, name: &str) -> Result<Reply, BridgeError> {
    let function = ApplicationFunction::from_name(name).ok_or_else(|| {
        BridgeError::UnsupportedOperation(format!("uia.application.function \"func: {name}\" is invalid."))
    })?;
    debug!(function = name, "application function");
    Ok(match function {
        ApplicationFunction::BundleId => Reply::value(app.bundle_id().await?),
        ApplicationFunction::Version => Reply::value(app.version().await?),
        ApplicationFunction::InterfaceOrientation => Reply::value(app.interface_orientation().await?),
        ApplicationFunction::Name => Reply::value(app.root().element_dict().await?.name),
        ApplicationFunction::Label => Reply::value(app.root().element_dict().await?.label),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_id_keeps_its_casing() {
        assert_eq!(ApplicationFunction::from_name("bundleID"), Some(ApplicationFunction::BundleId));
        assert_eq!(ApplicationFunction::from_name("bundleId"), None);
    }
}
