//! Helpers for tests in this crate.

use std::fs;

use tempfile::TempDir;

use opm_cue::MODULE_MARKER;

/// Write_module materializes an on-disk module directory from `(name,
/// source)` pairs, marker included.
pub(crate) fn write_module(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().expect("programmer error: tempdir");
    fs::create_dir(dir.path().join(MODULE_MARKER)).expect("programmer error: marker");
    for (name, src) in files {
        fs::write(dir.path().join(name), src).expect("programmer error: write");
    }
    dir
}

/// MODULE_SRC is a small but complete module used across tests: one
/// stateless `web` component plus a `data` component carrying a volume
/// resource and traits.
pub(crate) const MODULE_SRC: &str = r#"package demo

metadata: {
	name:     "demo"
	version:  "0.1.0"
	fqn:      "ex.com/demo@v0"
	identity: "7b1cdb5a-9f4e-5c0a-8a2e-111111111111"
	labels: {
		"app.io/team": "platform"
	}
}

#config: {
	image:     string
	replicas:  int
	debug?:    bool
}

values: {
	image:    "nginx:1.27"
	replicas: 2
}

#components: {
	web: {
		metadata: {
			name: "web"
			labels: {
				"workload-type": "stateless"
			}
			annotations: {
				"app.io/owner": "platform"
				"app.io/gc":    true
			}
		}
		#resources: {
			"Container": {
				image:    #config.image
				replicas: #config.replicas
			}
		}
		#traits: {
			"Expose": {port: 80}
		}
	}
	data: {
		metadata: {
			name: "data"
			labels: {
				"workload-type": "stateful"
			}
		}
		#resources: {
			"Volume": {size: "10Gi"}
		}
		#traits: {}
	}
}
"#;

/// PROVIDER_SRC is a provider with a `Deployment` transformer for stateless
/// workloads and a `Service` transformer keyed on the `Expose` trait.
pub(crate) const PROVIDER_SRC: &str = r#"transformers: {
	Deployment: {
		requiredLabels: {"workload-type": "stateless"}
		requiredResources: ["Container"]
		optionalTraits: ["AutoScale"]
		#transform: {
			#component: {...}
			#context: {
				name:      string
				namespace: string
				#moduleReleaseMetadata: {...}
				#componentMetadata: {...}
			}
			output: {
				apiVersion: "apps/v1"
				kind:       "Deployment"
				metadata: {
					name:      #context.#componentMetadata.name
					namespace: #context.namespace
				}
				spec: {
					replicas: #component.#resources.Container.replicas
					template: spec: containers: [{
						name:  #context.#componentMetadata.name
						image: #component.#resources.Container.image
					}]
				}
			}
		}
	}
	Service: {
		requiredLabels: {"workload-type": "stateless"}
		requiredTraits: ["Expose"]
		#transform: {
			#component: {...}
			#context: {
				name:      string
				namespace: string
				#moduleReleaseMetadata: {...}
				#componentMetadata: {...}
			}
			output: {
				apiVersion: "v1"
				kind:       "Service"
				metadata: {
					name:      #context.#componentMetadata.name
					namespace: #context.namespace
				}
				spec: ports: [{port: #component.#traits.Expose.port}]
			}
		}
	}
}
"#;
