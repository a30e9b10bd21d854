//! The panel's command set.
//!
//! Each command is a request struct whose fields are its positional wire
//! arguments. [`HostCommand`] closes the set so a host can decode any inbound
//! request once and route it with an exhaustive `match`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridge::protocol::{Command, decode_args};
use crate::dispatcher::{Dispatcher, DispatcherBuilder};
use crate::error::{BridgeError, HandlerError};

/// Read a persisted UI value. `null` when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetState(pub String);

impl Command for GetState {
    const NAME: &'static str = "getState";
    const ARITY: usize = 1;
    type Output = Value;
}

/// Persist a UI value under a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetState(pub String, pub Value);

impl Command for SetState {
    const NAME: &'static str = "setState";
    const ARITY: usize = 2;
    type Output = ();
}

/// Show an informational message from the panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello(pub String);

impl Command for Hello {
    const NAME: &'static str = "hello";
    const ARITY: usize = 1;
    type Output = ();
}

/// Ask the host to pick a folder. `None` when the user cancels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectFolder;

impl Command for SelectFolder {
    const NAME: &'static str = "selectFolder";
    const ARITY: usize = 0;
    type Output = Option<PathBuf>;
}

/// Scaffold a project named `.0` inside the folder `.1`; returns the new project's folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateProject(pub String, pub PathBuf);

impl Command for CreateProject {
    const NAME: &'static str = "createProject";
    const ARITY: usize = 2;
    type Output = PathBuf;
}

/// Open a folder in the editor; returns whether it was opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenFolder(pub PathBuf);

impl Command for OpenFolder {
    const NAME: &'static str = "openFolder";
    const ARITY: usize = 1;
    type Output = bool;
}

/// Any request the panel can send to its host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    GetState(GetState),
    SetState(SetState),
    Hello(Hello),
    SelectFolder(SelectFolder),
    CreateProject(CreateProject),
    OpenFolder(OpenFolder),
}

impl HostCommand {
    pub const NAMES: [&'static str; 6] = [
        GetState::NAME,
        SetState::NAME,
        Hello::NAME,
        SelectFolder::NAME,
        CreateProject::NAME,
        OpenFolder::NAME,
    ];

    pub fn decode(command: &str, data: Vec<Value>) -> Result<Self, BridgeError> {
        let invalid = |e| BridgeError::decode(command, e);
        let decoded = match command {
            c if c == GetState::NAME => Self::GetState(decode_args(data).map_err(invalid)?),
            c if c == SetState::NAME => Self::SetState(decode_args(data).map_err(invalid)?),
            c if c == Hello::NAME => Self::Hello(decode_args(data).map_err(invalid)?),
            c if c == SelectFolder::NAME => {
                Self::SelectFolder(decode_args(data).map_err(invalid)?)
            }
            c if c == CreateProject::NAME => {
                Self::CreateProject(decode_args(data).map_err(invalid)?)
            }
            c if c == OpenFolder::NAME => Self::OpenFolder(decode_args(data).map_err(invalid)?),
            other => return Err(BridgeError::UnknownCommand(other.to_string())),
        };
        Ok(decoded)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::GetState(_) => GetState::NAME,
            Self::SetState(_) => SetState::NAME,
            Self::Hello(_) => Hello::NAME,
            Self::SelectFolder(_) => SelectFolder::NAME,
            Self::CreateProject(_) => CreateProject::NAME,
            Self::OpenFolder(_) => OpenFolder::NAME,
        }
    }
}

/// Host-side implementation of the panel command set.
///
/// The editor primitives behind these (dialogs, terminals, folder opening)
/// belong to whatever embeds the bridge.
#[async_trait]
pub trait HostHandler: Send + Sync + 'static {
    async fn get_state(&self, key: String) -> Result<Value, HandlerError>;

    async fn set_state(&self, key: String, value: Value) -> Result<(), HandlerError>;

    async fn hello(&self, text: String) -> Result<(), HandlerError>;

    async fn select_folder(&self) -> Result<Option<PathBuf>, HandlerError>;

    async fn create_project(&self, name: String, parent: PathBuf)
    -> Result<PathBuf, HandlerError>;

    async fn open_folder(&self, path: PathBuf) -> Result<bool, HandlerError>;
}

/// Run one decoded command against `handler`, returning the wire result.
pub async fn serve_command<H>(handler: &H, command: HostCommand) -> Result<Value, HandlerError>
where
    H: HostHandler + ?Sized,
{
    tracing::trace!(command = command.name(), "Serving host command");
    let result = match command {
        HostCommand::GetState(GetState(key)) => handler.get_state(key).await?,
        HostCommand::SetState(SetState(key, value)) => {
            serde_json::to_value(handler.set_state(key, value).await?)?
        }
        HostCommand::Hello(Hello(text)) => serde_json::to_value(handler.hello(text).await?)?,
        HostCommand::SelectFolder(SelectFolder) => {
            serde_json::to_value(handler.select_folder().await?)?
        }
        HostCommand::CreateProject(CreateProject(name, parent)) => {
            serde_json::to_value(handler.create_project(name, parent).await?)?
        }
        HostCommand::OpenFolder(OpenFolder(path)) => {
            serde_json::to_value(handler.open_folder(path).await?)?
        }
    };
    Ok(result)
}

/// Builder with every panel command routed to `handler`.
///
/// Further registrations on the returned builder override individual commands.
pub fn host_dispatcher<H: HostHandler>(handler: Arc<H>) -> DispatcherBuilder {
    HostCommand::NAMES
        .into_iter()
        .fold(Dispatcher::builder(), |builder, name| {
            let handler = Arc::clone(&handler);
            builder.register(name, move |args| {
                let handler = Arc::clone(&handler);
                async move {
                    let command = HostCommand::decode(name, args)
                        .map_err(|e| HandlerError::new(e.to_string()))?;
                    serve_command(handler.as_ref(), command).await
                }
            })
        })
}
