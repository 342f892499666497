//! Management master: dispatches parsed administrative requests against the
//! module runtime, session registry, routing table, and processor master,
//! honouring the `Sync` header's exclusivity contract (§5) via the core's
//! sync gate. Owns nothing a `msg-interface` module couldn't reach through
//! `core` directly — it exists to keep wire-method dispatch in one place
//! rather than scattered across every transport front-end.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use flux::logging::{info, Logger};

use crate::core::ReflectorCore;
use crate::module::{ModuleClass, ModuleId, ModuleParam};
use crate::route::Access;

struct RunningModule {
    stop_flag: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct ManagementMaster {
    core: Arc<ReflectorCore>,
    logger: Logger,
    running: Mutex<HashMap<ModuleId, RunningModule>>,
    logged_in: Mutex<HashSet<String>>,
}

impl ManagementMaster {
    pub fn new(core: Arc<ReflectorCore>, logger: Logger) -> ManagementMaster {
        ManagementMaster {
            core,
            logger,
            running: Mutex::new(HashMap::new()),
            logged_in: Mutex::new(HashSet::new()),
        }
    }

    /// Entry point used by every `msg-interface` transport: honours the
    /// `Sync` header before dispatching, and echoes the request's `Id`
    /// header onto the response per §6.
    pub fn handle(&self, request: &rap::Request) -> rap::Response {
        let response = if request.wants_sync() {
            let _guard = self.core.sync_gate.enter_sync();
            self.dispatch(request)
        } else {
            let _guard = self.core.sync_gate.enter_async();
            self.dispatch(request)
        };
        match request.header("Id") {
            Some(id) => response.with_id(id.to_owned()),
            None => response,
        }
    }

    fn dispatch(&self, request: &rap::Request) -> rap::Response {
        match request.method.as_str() {
            "START" => self.handle_start(request),
            "STOP" => self.handle_stop(request),
            "RESTART" => self.handle_restart(request),
            "STATUS" => self.handle_status(request),
            "LIST" => self.handle_list(request),
            "AVAIL" => self.handle_avail(),
            "LOG" => self.handle_log(request),
            "CLIENTS" => self.handle_clients(request),
            "ACL" => self.handle_acl(request),
            "SESSION" => self.handle_session(request),
            "PROCESS" => self.handle_process(request),
            "PASS" => self.handle_pass(request),
            "LOGIN" => self.handle_login(request),
            "LOGOUT" => self.handle_logout(request),
            "KEEP-ALIVE" => rap::Response::new(200),
            _ => rap::Response::new(501),
        }
    }

    fn resolve_id(&self, request: &rap::Request) -> Option<ModuleId> {
        let class = ModuleClass::parse(request.header("Class")?)?;
        let name = request.header("Name")?;
        Some(ModuleId::new(class, name.to_owned()))
    }

    fn handle_start(&self, request: &rap::Request) -> rap::Response {
        let class = match request.header("Class").and_then(ModuleClass::parse) {
            Some(class) => class,
            None => return rap::Response::new(400),
        };
        let name = match request.header("Name") {
            Some(name) => name,
            None => return rap::Response::new(400),
        };
        let params: Vec<ModuleParam> = request
            .headers
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix("Param-")
                    .map(|param_name| ModuleParam::new(param_name, "", v.clone()))
            })
            .collect();

        let id = match self.core.modules.load(class, name, params) {
            Ok(id) => id,
            Err(_) => return rap::Response::new(407),
        };
        if self.core.modules.initialise(&id).is_err() {
            let _ = self.core.modules.destroy(&id);
            return rap::Response::new(500);
        }
        self.spawn_and_track(id);
        rap::Response::new(200)
    }

    fn spawn_and_track(&self, id: ModuleId) {
        let stop_flag = Arc::new(AtomicBool::new(false));
        match self.core.modules.clone().spawn(id.clone(), stop_flag.clone()) {
            Ok(handle) => {
                self.running.lock().unwrap().insert(id, RunningModule { stop_flag, handle });
            }
            Err(_) => {}
        }
    }

    fn handle_stop(&self, request: &rap::Request) -> rap::Response {
        let id = match self.resolve_id(request) {
            Some(id) => id,
            None => return rap::Response::new(400),
        };
        self.stop_and_join(&id);
        rap::Response::new(200)
    }

    fn stop_and_join(&self, id: &ModuleId) {
        let running = self.running.lock().unwrap().remove(id);
        if let Some(running) = running {
            running.stop_flag.store(true, Ordering::Relaxed);
            let _ = running.handle.join();
        }
    }

    fn handle_restart(&self, request: &rap::Request) -> rap::Response {
        let id = match self.resolve_id(request) {
            Some(id) => id,
            None => return rap::Response::new(400),
        };
        self.stop_and_join(&id);
        if self.core.modules.restart(&id).is_err() {
            return rap::Response::new(407);
        }
        if self.core.modules.initialise(&id).is_err() {
            return rap::Response::new(500);
        }
        self.spawn_and_track(id);
        rap::Response::new(200)
    }

    fn handle_status(&self, request: &rap::Request) -> rap::Response {
        let id = match self.resolve_id(request) {
            Some(id) => id,
            None => return rap::Response::new(400),
        };
        match self.core.modules.state(&id) {
            Some(state) => rap::Response::new(200).with_body(format!("{:?}", state).into_bytes()),
            None => rap::Response::new(404),
        }
    }

    fn handle_list(&self, request: &rap::Request) -> rap::Response {
        let class = request
            .header("Class")
            .and_then(ModuleClass::parse)
            .unwrap_or(ModuleClass::Reflector);
        let mut names = Vec::new();
        self.core.modules.foreach(class, |id| names.push(id.to_string()));
        rap::Response::new(200).with_body(names.join("\n").into_bytes())
    }

    fn handle_avail(&self) -> rap::Response {
        let names: Vec<String> = self.core.registry.available().iter().map(|id| id.to_string()).collect();
        rap::Response::new(200).with_body(names.join("\n").into_bytes())
    }

    fn handle_log(&self, request: &rap::Request) -> rap::Response {
        info!(self.logger, "administrative log request"; "target" => request.header("Target").unwrap_or("-"));
        rap::Response::new(100)
    }

    fn handle_clients(&self, request: &rap::Request) -> rap::Response {
        let listener_id = match self.resolve_listener(request) {
            Some(id) => id,
            None => return rap::Response::new(404),
        };
        let (address, mask_bits) = match request.header("Address").and_then(parse_cidr) {
            Some(parsed) => parsed,
            None => return rap::Response::new(400),
        };

        let result = match request.header("Action") {
            Some("add") => self
                .core
                .sessions
                .client_add(listener_id, address, flux::time::timestamp_secs(), false)
                .map(|_| ()),
            Some("remove") => self.core.sessions.client_remove(listener_id, address, mask_bits).map(|_| ()),
            _ => return rap::Response::new(400),
        };

        match result {
            Ok(()) => rap::Response::new(200),
            Err(_) => rap::Response::new(500),
        }
    }

    fn handle_acl(&self, request: &rap::Request) -> rap::Response {
        let (network, prefix_bits) = match request.header("Network").and_then(parse_cidr_v4) {
            Some(parsed) => parsed,
            None => return rap::Response::new(400),
        };
        let result = match request.header("Action") {
            Some("allow") => self.core.routing.set_acl(network, prefix_bits, Access::Allow),
            Some("deny") => self.core.routing.set_acl(network, prefix_bits, Access::Deny),
            Some("remove") => self.core.routing.remove_acl(network, prefix_bits),
            _ => return rap::Response::new(400),
        };
        match result {
            Ok(()) => rap::Response::new(200),
            Err(_) => rap::Response::new(400),
        }
    }

    fn handle_session(&self, request: &rap::Request) -> rap::Response {
        let listener_id = match self.resolve_listener(request) {
            Some(id) => id,
            None => return rap::Response::new(404),
        };
        match self.core.sessions.session(listener_id) {
            Ok(session) => {
                let (received, sent) = session.counters();
                rap::Response::new(200).with_body(format!("received={} sent={}", received, sent).into_bytes())
            }
            Err(_) => rap::Response::new(404),
        }
    }

    fn handle_process(&self, request: &rap::Request) -> rap::Response {
        let (destination, prefix_bits) = match request.header("Target").and_then(parse_cidr_v4) {
            Some(parsed) => parsed,
            None => return rap::Response::new(400),
        };
        let path: Vec<String> = match request.header("Path") {
            Some(path) if !path.is_empty() => path.split(',').map(|s| s.trim().to_owned()).collect(),
            _ => Vec::new(),
        };
        match self.core.routing.set_path_rule(destination, prefix_bits, path) {
            Ok(()) => rap::Response::new(200),
            Err(_) => rap::Response::new(400),
        }
    }

    /// Passes a nested RAP frame through on behalf of the module named in
    /// `Target`, exercising the request-in-request exemption (§5): the
    /// outer request must already hold the synchronous gate.
    fn handle_pass(&self, request: &rap::Request) -> rap::Response {
        let module_name = match request.header("Target") {
            Some(name) => name,
            None => return rap::Response::new(400),
        };
        let _guard = match self.core.sync_gate.request_in_request(module_name) {
            Ok(guard) => guard,
            Err(_) => return rap::Response::new(407),
        };
        match rap::parse_request(&request.body) {
            Ok(rap::ParseOutcome::Complete { request: inner, .. }) => self.dispatch(&inner),
            _ => rap::Response::new(400),
        }
    }

    fn handle_login(&self, request: &rap::Request) -> rap::Response {
        match request.header("Id") {
            Some(id) => {
                self.logged_in.lock().unwrap().insert(id.to_owned());
                rap::Response::new(200)
            }
            None => rap::Response::new(400),
        }
    }

    fn handle_logout(&self, request: &rap::Request) -> rap::Response {
        if let Some(id) = request.header("Id") {
            self.logged_in.lock().unwrap().remove(id);
        }
        rap::Response::new(200)
    }

    fn resolve_listener(&self, request: &rap::Request) -> Option<u32> {
        let target = request.header("Target")?;
        let name = target.strip_prefix("listener/").unwrap_or(target);
        self.core.sessions.find_by_name(name)
    }
}

fn parse_cidr(value: &str) -> Option<(IpAddr, u8)> {
    let mut parts = value.splitn(2, '/');
    let address: IpAddr = parts.next()?.parse().ok()?;
    let bits: u8 = parts.next()?.parse().ok()?;
    Some((address, bits))
}

fn parse_cidr_v4(value: &str) -> Option<(Ipv4Addr, u8)> {
    let (address, bits) = parse_cidr(value)?;
    match address {
        IpAddr::V4(v4) => Some((v4, bits)),
        IpAddr::V6(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleInterface;

    fn master() -> ManagementMaster {
        ManagementMaster::new(ReflectorCore::new().unwrap(), flux::logging::discard())
    }

    fn request(method: &str, headers: &[(&str, &str)]) -> rap::Request {
        rap::Request {
            method: method.to_owned(),
            headers: headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            body: Vec::new(),
        }
    }

    #[test]
    fn unknown_method_is_not_implemented() {
        let master = master();
        let response = master.handle(&request("BOGUS", &[]));
        assert_eq!(response.code, 501);
    }

    #[test]
    fn keep_alive_is_always_ok() {
        let master = master();
        assert_eq!(master.handle(&request("KEEP-ALIVE", &[])).code, 200);
    }

    #[test]
    fn id_header_is_echoed_onto_the_response() {
        let master = master();
        let response = master.handle(&request("KEEP-ALIVE", &[("Id", "abc123")]));
        assert_eq!(response.id, Some("abc123".to_owned()));
    }

    #[test]
    fn acl_allow_then_deny_resolves_most_specific() {
        let master = master();
        let allow = master.handle(&request("ACL", &[("Network", "10.0.0.0/8"), ("Action", "allow")]));
        assert_eq!(allow.code, 200);
        let deny = master.handle(&request("ACL", &[("Network", "10.0.0.0/24"), ("Action", "deny")]));
        assert_eq!(deny.code, 200);
        assert_eq!(master.core.routing.acl_check("10.0.0.5".parse().unwrap()), Access::Deny);
        assert_eq!(master.core.routing.acl_check("10.5.0.5".parse().unwrap()), Access::Allow);
    }

    #[test]
    fn process_sets_path_rule_visible_to_routing_table() {
        let master = master();
        let response = master.handle(&request("PROCESS", &[("Target", "10.1.0.0/16"), ("Path", "filter, upper")]));
        assert_eq!(response.code, 200);
        assert_eq!(
            master.core.routing.path_rule("10.1.2.3".parse().unwrap()),
            Some(vec!["filter".to_owned(), "upper".to_owned()])
        );
    }

    #[test]
    fn clients_add_then_session_reports_membership() {
        let master = master();
        let listener_id = master.core.sessions.register_listener("udp-test", 1234);
        let add = master.handle(&request(
            "CLIENTS",
            &[("Target", "listener/udp-test"), ("Action", "add"), ("Address", "192.0.2.17/32")],
        ));
        assert_eq!(add.code, 200);
        let clients = master.core.sessions.session(listener_id).unwrap().client_list_copy();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].address, "192.0.2.17".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn status_and_list_reflect_loaded_modules() {
        let master = master();
        master
            .core
            .registry
            .register(ModuleClass::Processor, "noop", Arc::new(|_| {
                struct Noop;
                impl ModuleInterface for Noop {
                    fn init(&mut self) -> crate::error::Result<()> {
                        Ok(())
                    }
                    fn main(&mut self, _stop_flag: &AtomicBool) {}
                }
                Ok(Box::new(Noop) as Box<dyn ModuleInterface>)
            }));

        let start = master.handle(&request("START", &[("Class", "processor"), ("Name", "noop")]));
        assert_eq!(start.code, 200);

        let list = master.handle(&request("LIST", &[("Class", "processor")]));
        assert_eq!(String::from_utf8(list.body).unwrap(), "processor/noop");

        let avail = master.handle(&request("AVAIL", &[]));
        assert_eq!(String::from_utf8(avail.body).unwrap(), "processor/noop");

        master.handle(&request("STOP", &[("Class", "processor"), ("Name", "noop")]));
        let status = master.handle(&request("STATUS", &[("Class", "processor"), ("Name", "noop")]));
        assert_eq!(String::from_utf8(status.body).unwrap(), "Stopped");
    }

    #[test]
    fn login_then_logout_round_trips() {
        let master = master();
        assert_eq!(master.handle(&request("LOGIN", &[("Id", "u1")])).code, 200);
        assert!(master.logged_in.lock().unwrap().contains("u1"));
        master.handle(&request("LOGOUT", &[("Id", "u1")]));
        assert!(!master.logged_in.lock().unwrap().contains("u1"));
    }
}
