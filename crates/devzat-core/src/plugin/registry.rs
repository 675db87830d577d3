//! Plugin-provided commands. `RegisterCmd` hands the plugin a stream of
//! invocations whenever a user runs its command name; ported from the
//! `cmds` map in `original_source/rpc.go`.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};

use devzat_proto::{CmdDef, CmdInvocation};

struct RegisteredCmd {
    def: CmdDef,
    to_plugin: mpsc::Sender<CmdInvocation>,
}

#[derive(Default)]
pub struct PluginCommandRegistry {
    cmds: RwLock<HashMap<String, RegisteredCmd>>,
}

impl PluginCommandRegistry {
    pub fn new() -> Self {
        PluginCommandRegistry::default()
    }

    pub async fn register(&self, def: CmdDef, to_plugin: mpsc::Sender<CmdInvocation>) {
        self.cmds.write().await.insert(def.name.clone(), RegisteredCmd { def, to_plugin });
    }

    pub async fn unregister(&self, name: &str) {
        self.cmds.write().await.remove(name);
    }

    pub async fn is_registered(&self, name: &str) -> bool {
        self.cmds.read().await.contains_key(name)
    }

    pub async fn list(&self) -> Vec<CmdDef> {
        self.cmds.read().await.values().map(|c| c.def.clone()).collect()
    }

    /// Deliver an invocation to the plugin that registered `name`. Returns
    /// false if no such command is registered, or if the plugin has gone
    /// away (stale entries are left for `RegisterCmd`'s stream teardown to
    /// clean up).
    pub async fn dispatch(&self, name: &str, invocation: CmdInvocation) -> bool {
        let Some(cmd) = self.cmds.read().await.get(name).map(|c| c.to_plugin.clone()) else {
            return false;
        };
        cmd.send(invocation).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatch_reaches_registered_command() {
        let registry = PluginCommandRegistry::new();
        let (tx, mut rx) = mpsc::channel(1);
        registry
            .register(CmdDef { name: "roll".into(), args_info: "".into(), info: "".into() }, tx)
            .await;

        assert!(registry.is_registered("roll").await);
        let delivered = registry
            .dispatch("roll", CmdInvocation { room: "main".into(), from: "alice".into(), args: "".into() })
            .await;
        assert!(delivered);
        assert_eq!(rx.recv().await.unwrap().from, "alice");
    }

    #[tokio::test]
    async fn dispatch_to_unknown_command_fails() {
        let registry = PluginCommandRegistry::new();
        assert!(!registry.dispatch("nope", CmdInvocation::default()).await);
    }
}
