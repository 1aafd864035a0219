use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::channel::oneshot;
use futures::executor::block_on;
use futures_timer::Delay;
use rust_decimal::Decimal;
use serde_json::{Value, json};

use crate::prelude::*;
use crate::value::{as_decimal, decimal_to_value};

fn strict() -> FormOptions {
    FormOptions {
        strict_paths: true,
        ..FormOptions::default()
    }
}

fn lenient() -> FormOptions {
    FormOptions {
        strict_paths: false,
        ..FormOptions::default()
    }
}

fn set(form: &Form, path: &str, value: Value) {
    form.root()
        .resolve(&FieldPath::parse(path).expect("path"))
        .expect("node")
        .set_value(value)
        .expect("set");
}

fn get(form: &Form, path: &str) -> Value {
    form.root()
        .resolve(&FieldPath::parse(path).expect("path"))
        .expect("node")
        .raw_value()
}

#[test]
fn async_validation_keeps_only_the_latest_value() {
    let form = Form::with_options(
        &GroupSchema::new().field("username", FieldConfig::new("")),
        strict(),
    );
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = calls.clone();
        form.apply_validation_schema(move |v: &mut ValidationBuilder, root: Path<Value>| {
            v.validate_async(
                root.key("username"),
                move |name: String| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Some(ValidationError::new("taken", format!("{name} is taken"))) }
                },
                AsyncOptions::debounce(Duration::from_millis(500)),
            );
        })
        .expect("schema");
    }

    set(&form, "username", json!("first"));
    set(&form, "username", json!("second"));
    let username = form.root().field("username").expect("username");
    assert!(username.pending());

    block_on(form.settle());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        username.errors(),
        vec![ValidationError::new("taken", "second is taken")]
    );
    assert_eq!(username.status(), NodeStatus::Invalid);
}

#[test]
fn conditional_rules_only_apply_while_the_condition_holds() {
    let form = Form::with_options(
        &GroupSchema::new()
            .field("hasProperty", FieldConfig::new(false))
            .field("propertyValue", FieldConfig::new("")),
        strict(),
    );
    form.apply_validation_schema(|v: &mut ValidationBuilder, _: Path<Value>| {
        v.apply_when("hasProperty", |has: &bool| *has, |v| {
            v.required("propertyValue").message("Property value is required");
        });
    })
    .expect("schema");

    assert!(form.validate());
    assert!(form.root().errors().is_empty());

    set(&form, "hasProperty", json!(true));
    assert!(!form.validate());
    let errors = form.root().errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message(), "Property value is required");

    set(&form, "hasProperty", json!(false));
    assert!(form.validate());
}

#[test]
fn computed_fields_follow_their_sources() {
    let form = Form::from_defaults(&json!({ "a": 0, "b": 0, "sum": 0 }));
    form.apply_behavior_schema(|b: &mut BehaviorBuilder, _: Path<Value>| {
        b.compute_from("sum", ["a", "b"], |values: &[Value]| {
            decimal_to_value(values.iter().filter_map(as_decimal).sum::<Decimal>())
        });
    })
    .expect("schema");

    set(&form, "a", json!(50000));
    set(&form, "b", json!(10000));
    assert_eq!(as_decimal(&get(&form, "sum")), Some(Decimal::from(60000)));

    set(&form, "a", json!(0));
    assert_eq!(as_decimal(&get(&form, "sum")), Some(Decimal::from(10000)));

    let sum = form.root().field("sum").expect("sum");
    assert!(!sum.dirty());
}

#[test]
fn computed_fields_refuse_to_depend_on_themselves() {
    let form = Form::with_options(
        &GroupSchema::infer(&json!({ "a": 1, "b": 2, "total": 0 })),
        strict(),
    );
    let direct = form.apply_behavior_schema(|b: &mut BehaviorBuilder, _: Path<Value>| {
        b.compute_from("total", ["a", "total"], |values: &[Value]| values[0].clone());
    });
    assert!(matches!(direct, Err(FormError::CyclicDependency { .. })));

    let transitive = form.apply_behavior_schema(|b: &mut BehaviorBuilder, _: Path<Value>| {
        b.compute_from("b", ["a"], |values: &[Value]| values[0].clone());
        b.compute_from("a", ["b"], |values: &[Value]| values[0].clone());
    });
    assert!(matches!(transitive, Err(FormError::CyclicDependency { .. })));

    // The rejected schema rolled back its first compute, so `a` is free again.
    form.apply_behavior_schema(|b: &mut BehaviorBuilder, _: Path<Value>| {
        b.compute_from("a", ["b"], |values: &[Value]| values[0].clone());
    })
    .expect("a <- b");
    set(&form, "b", json!(7));
    assert_eq!(get(&form, "a"), json!(7));
}

#[test]
fn enable_when_resets_and_disables_the_target() {
    let form = Form::from_defaults(&json!({ "loanType": "mortgage", "propertyValue": "" }));
    form.apply_behavior_schema(|b: &mut BehaviorBuilder, _: Path<Value>| {
        b.enable_when(
            "propertyValue",
            "loanType",
            |loan_type: &String| loan_type == "mortgage",
            EnableOptions::reset_on_disable(),
        );
    })
    .expect("schema");

    set(&form, "propertyValue", json!(350000));
    assert_eq!(form.value()["propertyValue"], json!(350000));

    set(&form, "loanType", json!("personal"));
    let property_value = form.root().field("propertyValue").expect("field");
    assert!(property_value.disabled());
    assert_eq!(property_value.value(), json!(""));
    assert_eq!(form.value(), json!({ "loanType": "personal" }));

    set(&form, "loanType", json!("mortgage"));
    assert!(!property_value.disabled());
    assert_eq!(form.value()["propertyValue"], json!(""));
}

#[test]
fn disable_when_inverts_the_predicate() {
    let form = Form::from_defaults(&json!({ "employed": true, "employer": "Acme" }));
    form.apply_behavior_schema(|b: &mut BehaviorBuilder, _: Path<Value>| {
        b.disable_when(
            "employer",
            "employed",
            |employed: &bool| !*employed,
            EnableOptions::default(),
        );
    })
    .expect("schema");

    let employer = form.root().field("employer").expect("employer");
    assert!(!employer.disabled());
    set(&form, "employed", json!(false));
    assert!(employer.disabled());
    assert_eq!(employer.value(), json!("Acme"));
}

#[test]
fn behavior_apply_when_keeps_a_single_live_activation() {
    let form = Form::from_defaults(&json!({ "flag": false, "source": "", "other": "" }));
    let seen = Arc::new(AtomicUsize::new(0));
    {
        let seen = seen.clone();
        form.apply_behavior_schema(move |b: &mut BehaviorBuilder, _: Path<Value>| {
            let seen = seen.clone();
            b.apply_when("flag", |flag: &bool| *flag, move |b| {
                let seen = seen.clone();
                b.watch_field(
                    "source",
                    move |_, _| {
                        seen.fetch_add(1, Ordering::SeqCst);
                    },
                    WatchOptions::default(),
                );
            });
        })
        .expect("schema");
    }

    set(&form, "source", json!("ignored"));
    assert_eq!(seen.load(Ordering::SeqCst), 0);

    set(&form, "flag", json!(true));
    set(&form, "other", json!("noise"));
    set(&form, "flag", json!(true));
    set(&form, "source", json!("a"));
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    set(&form, "flag", json!(false));
    set(&form, "source", json!("b"));
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    set(&form, "flag", json!(true));
    set(&form, "source", json!("c"));
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[test]
fn cleanup_stops_effects() {
    let form = Form::from_defaults(&json!({ "a": "", "b": "" }));
    let cleanup = form
        .apply_behavior_schema(|b: &mut BehaviorBuilder, _: Path<Value>| {
            b.copy_from("b", "a", CopyOptions::default());
        })
        .expect("schema");

    set(&form, "a", json!("one"));
    assert_eq!(get(&form, "b"), json!("one"));

    cleanup.run();
    cleanup.run();
    set(&form, "a", json!("two"));
    assert_eq!(get(&form, "b"), json!("one"));
}

#[test]
fn dispose_releases_every_installed_behavior() {
    let form = Form::from_defaults(&json!({ "a": "", "b": "" }));
    form.apply_behavior_schema(|b: &mut BehaviorBuilder, _: Path<Value>| {
        b.copy_from("b", "a", CopyOptions::default());
    })
    .expect("schema");

    form.dispose();
    set(&form, "a", json!("after"));
    assert_eq!(get(&form, "b"), json!(""));
}

#[test]
fn copy_from_filters_picks_and_transforms() {
    let form = Form::from_defaults(&json!({
        "sameAsBilling": false,
        "billing": { "street": "", "city": "" },
        "shipping": { "street": "", "city": "Unset" },
        "name": "",
        "displayName": ""
    }));
    form.apply_behavior_schema(|b: &mut BehaviorBuilder, _: Path<Value>| {
        b.copy_from(
            "shipping",
            "billing",
            CopyOptions::default()
                .when("sameAsBilling", |same: &bool| *same)
                .fields(["street"]),
        );
        b.copy_from(
            "displayName",
            "name",
            CopyOptions::default().transform(|value| match value {
                Value::String(name) => Value::String(name.to_uppercase()),
                other => other,
            }),
        );
    })
    .expect("schema");

    set(&form, "billing.street", json!("1 Main St"));
    assert_eq!(get(&form, "shipping.street"), json!(""));

    set(&form, "sameAsBilling", json!(true));
    assert_eq!(get(&form, "shipping.street"), json!("1 Main St"));
    assert_eq!(get(&form, "shipping.city"), json!("Unset"));

    set(&form, "name", json!("ada"));
    assert_eq!(get(&form, "displayName"), json!("ADA"));
    assert!(!form.root().field("displayName").expect("field").dirty());
}

#[test]
fn sync_fields_copies_both_ways() {
    let form = Form::from_defaults(&json!({ "email": "", "contactEmail": "" }));
    form.apply_behavior_schema(|b: &mut BehaviorBuilder, _: Path<Value>| {
        b.sync_fields("email", "contactEmail");
    })
    .expect("schema");

    set(&form, "email", json!("a@example.com"));
    assert_eq!(get(&form, "contactEmail"), json!("a@example.com"));

    set(&form, "contactEmail", json!("b@example.com"));
    assert_eq!(get(&form, "email"), json!("b@example.com"));
}

#[test]
fn reset_when_restores_the_initial_value() {
    let form = Form::from_defaults(&json!({ "country": "US", "state": "CA" }));
    form.apply_behavior_schema(|b: &mut BehaviorBuilder, _: Path<Value>| {
        b.reset_when("state", "country", |country: &String| country != "US");
    })
    .expect("schema");

    set(&form, "state", json!("NY"));
    set(&form, "country", json!("CA"));
    let state = form.root().field("state").expect("state");
    assert_eq!(state.value(), json!("CA"));
    assert!(!state.dirty());
}

#[test]
fn debounced_watchers_see_only_the_last_change() {
    let form = Form::from_defaults(&json!({ "query": "" }));
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        form.apply_behavior_schema(move |b: &mut BehaviorBuilder, _: Path<Value>| {
            let seen = seen.clone();
            b.watch_field(
                "query",
                move |value, _| seen.lock().expect("seen").push(value.clone()),
                WatchOptions::default().debounce(Duration::from_millis(50)),
            );
        })
        .expect("schema");
    }

    set(&form, "query", json!("a"));
    set(&form, "query", json!("ab"));
    set(&form, "query", json!("abc"));
    assert!(seen.lock().expect("seen").is_empty());

    block_on(form.settle());
    assert_eq!(*seen.lock().expect("seen"), vec![json!("abc")]);
}

#[test]
fn immediate_watchers_run_on_install() {
    let form = Form::from_defaults(&json!({ "plan": "basic", "seats": 1 }));
    form.apply_behavior_schema(|b: &mut BehaviorBuilder, _: Path<Value>| {
        b.watch_field(
            "plan",
            |plan, ctx| {
                let seats = if plan == "team" { 5 } else { 1 };
                ctx.set_field("seats", json!(seats)).expect("seats");
            },
            WatchOptions::default().immediate(),
        );
    })
    .expect("schema");

    assert_eq!(get(&form, "seats"), json!(1));
    set(&form, "plan", json!("team"));
    assert_eq!(get(&form, "seats"), json!(5));
}

#[test]
fn superseded_async_watchers_drop_their_writes() {
    let form = Form::from_defaults(&json!({ "region": "", "options": [] }));
    let (release, gate) = oneshot::channel::<()>();
    let gate = Arc::new(Mutex::new(Some(gate)));
    let writes = Arc::new(Mutex::new(Vec::new()));
    {
        let writes = writes.clone();
        form.root()
            .field("options")
            .expect("options")
            .on_change({
                let form_root = form.root().clone();
                move || {
                    let value = form_root.field("options").map(|field| field.value());
                    writes.lock().expect("writes").extend(value);
                }
            });
    }
    form.apply_behavior_schema(move |b: &mut BehaviorBuilder, _: Path<Value>| {
        let gate = gate.clone();
        b.watch_field_async(
            "region",
            move |region, ctx| {
                let gate = gate.lock().expect("gate").take();
                async move {
                    if let Some(gate) = gate {
                        let _ = gate.await;
                    }
                    ctx.set_field("options", json!([region])).expect("options");
                }
            },
            WatchOptions::default(),
        );
    })
    .expect("schema");

    set(&form, "region", json!("slow"));
    block_on(futures::future::join(form.settle(), async {
        Delay::new(Duration::from_millis(20)).await;
        set(&form, "region", json!("fast"));
        let _ = release.send(());
    }));

    assert_eq!(get(&form, "options"), json!(["fast"]));
    assert_eq!(*writes.lock().expect("writes"), vec![json!(["fast"])]);
}

#[test]
fn behavior_context_updates_component_props() {
    let form = Form::new(
        &GroupSchema::new()
            .field("country", FieldConfig::new(""))
            .field(
                "city",
                FieldConfig::new("")
                    .component("select")
                    .prop("placeholder", "Pick a city"),
            ),
    );
    form.apply_behavior_schema(|b: &mut BehaviorBuilder, _: Path<Value>| {
        b.watch_field(
            "country",
            |country, ctx| {
                let options = if country == "FR" {
                    json!(["Paris", "Lyon"])
                } else {
                    json!([])
                };
                let mut props = serde_json::Map::new();
                props.insert("options".into(), options);
                ctx.update_component_props("city", props).expect("props");
            },
            WatchOptions::default(),
        );
    })
    .expect("schema");

    set(&form, "country", json!("FR"));
    let city = form.root().field("city").expect("city");
    let view = city.view();
    assert_eq!(view.component.as_deref(), Some("select"));
    assert_eq!(view.component_props["options"], json!(["Paris", "Lyon"]));
    assert_eq!(view.component_props["placeholder"], json!("Pick a city"));
}

#[test]
fn tree_rules_rerun_when_their_dependencies_change() {
    let form = Form::from_defaults(&json!({ "password": "", "confirm": "" }));
    form.apply_validation_schema(|v: &mut ValidationBuilder, _: Path<Value>| {
        v.validate_tree("confirm", |ctx: &TreeContext| {
            (ctx.get::<String>("password") != ctx.get::<String>("confirm"))
                .then(|| ValidationError::new("mismatch", "Passwords do not match"))
        });
    })
    .expect("validation");
    form.apply_behavior_schema(|b: &mut BehaviorBuilder, _: Path<Value>| {
        b.revalidate_when("confirm", ["password"]);
    })
    .expect("behavior");

    set(&form, "password", json!("hunter2"));
    let confirm = form.root().field("confirm").expect("confirm");
    assert_eq!(confirm.errors()[0].code(), "mismatch");

    set(&form, "confirm", json!("hunter2"));
    assert!(confirm.errors().is_empty());

    set(&form, "password", json!("changed"));
    assert_eq!(confirm.errors()[0].code(), "mismatch");
}

#[test]
fn unresolvable_paths_fail_only_in_strict_mode() {
    let schema = GroupSchema::new().field("name", FieldConfig::new(""));

    let form = Form::with_options(&schema, strict());
    let result = form.apply_validation_schema(|v: &mut ValidationBuilder, _: Path<Value>| {
        v.required("missing");
    });
    assert!(matches!(result, Err(FormError::FieldNotFound { .. })));

    let form = Form::with_options(&schema, lenient());
    form.apply_validation_schema(|v: &mut ValidationBuilder, _: Path<Value>| {
        v.required("missing");
        v.required("name");
    })
    .expect("lenient schema");
    assert!(!form.validate());

    form.apply_behavior_schema(|b: &mut BehaviorBuilder, _: Path<Value>| {
        b.copy_from("name", "nowhere", CopyOptions::default());
    })
    .expect("lenient behaviors");
}

#[test]
fn runaway_effects_are_cut_off() {
    let form = Form::with_options(
        &GroupSchema::infer(&json!({ "counter": 0 })),
        FormOptions {
            max_effect_runs: 5,
            ..strict()
        },
    );
    form.apply_behavior_schema(|b: &mut BehaviorBuilder, _: Path<Value>| {
        b.watch_field(
            "counter",
            |value, ctx| {
                let next = value.as_i64().unwrap_or_default() + 1;
                ctx.set_field("counter", json!(next)).expect("counter");
            },
            WatchOptions::default(),
        );
    })
    .expect("schema");

    set(&form, "counter", json!(1));
    let counter = get(&form, "counter").as_i64().expect("number");
    assert!((2..=10).contains(&counter));
}

#[test]
fn nodes_report_their_path() {
    let form = Form::new(
        &GroupSchema::new().array_with(
            "items",
            ArraySchema::new(GroupSchema::new().field("name", FieldConfig::new("")))
                .with_items(vec![json!({ "name": "A" }), json!({ "name": "B" })]),
        ),
    );
    let items = form.root().array("items").expect("items");
    let name = items.at(1).expect("item").field("name").expect("name");
    assert_eq!(FormNode::from(name).path().to_string(), "items[1].name");

    items.remove(0).expect("remove");
    let name = items.at(0).expect("item").field("name").expect("name");
    assert_eq!(FormNode::from(name.clone()).path().to_string(), "items[0].name");
    assert_eq!(name.value(), json!("B"));
}

fn recorder(slot: Arc<Mutex<Option<Value>>>) -> impl FnOnce(&Value) -> FormResult<()> {
    move |value| {
        *slot.lock().expect("slot") = Some(value.clone());
        Ok(())
    }
}

#[test]
fn submit_runs_the_handler_only_for_valid_forms() {
    let form = Form::new(&GroupSchema::new().field(
        "name",
        FieldConfig::new("").validator(validators::required()),
    ));
    let submitted = Arc::new(Mutex::new(None));

    form.submit(recorder(submitted.clone())).expect("submit");
    assert_eq!(form.submit_state(), SubmitState::Failed);
    assert!(submitted.lock().expect("submitted").is_none());
    assert!(form.root().field("name").expect("name").touched());

    set(&form, "name", json!("Ada"));
    form.submit(recorder(submitted.clone())).expect("submit");
    assert_eq!(form.submit_state(), SubmitState::Succeeded);
    assert_eq!(
        *submitted.lock().expect("submitted"),
        Some(json!({ "name": "Ada" }))
    );
    assert_eq!(form.submit_count(), 2);

    let failure = form.submit(|_| Err(FormError::Submit("offline".into())));
    assert_eq!(failure, Err(FormError::Submit("offline".into())));
    assert_eq!(form.submit_state(), SubmitState::Failed);

    form.reset().expect("reset");
    assert_eq!(form.submit_state(), SubmitState::Idle);
    assert_eq!(get(&form, "name"), json!(""));
}

#[test]
fn async_submit_waits_for_async_validators() {
    let form = Form::with_options(
        &GroupSchema::new().field("username", FieldConfig::new("ada")),
        strict(),
    );
    form.apply_validation_schema(|v: &mut ValidationBuilder, root: Path<Value>| {
        v.validate_async(
            root.key("username"),
            |name: String| async move {
                (name == "taken").then(|| ValidationError::new("taken", "Name is taken"))
            },
            AsyncOptions::default(),
        );
    })
    .expect("schema");

    let result = block_on(form.submit_async(|value| async move {
        assert_eq!(value, json!({ "username": "ada" }));
        Ok::<_, FormError>(())
    }));
    assert_eq!(result, Ok(()));
    assert_eq!(form.submit_state(), SubmitState::Succeeded);

    set(&form, "username", json!("taken"));
    block_on(form.submit_async(|_| async { Ok::<_, FormError>(()) })).expect("submit");
    assert_eq!(form.submit_state(), SubmitState::Failed);
    assert_eq!(
        form.root().field("username").expect("username").errors()[0].code(),
        "taken"
    );
}

#[allow(dead_code)]
#[derive(crate::FormPaths)]
#[form_paths(rename_all = "camelCase")]
struct Contact {
    first_name: String,
    phones: Vec<Phone>,
}

#[allow(dead_code)]
#[derive(crate::FormPaths)]
struct Phone {
    number: String,
}

#[test]
fn derived_handles_drive_item_schemas() {
    let form = Form::with_options(
        &GroupSchema::new()
            .field("firstName", FieldConfig::new(""))
            .array("phones", GroupSchema::new().field("number", FieldConfig::new(""))),
        strict(),
    );
    form.apply_validation_schema(|v: &mut ValidationBuilder, contact: ContactPaths| {
        v.required(contact.first_name());
        v.each(contact.phones(), |v: &mut ValidationBuilder, phone: PhonePaths| {
            v.pattern(phone.number(), r"^\+?[0-9 ]{6,}$")
                .message("Enter a phone number");
        });
    })
    .expect("schema");

    let phones = form.root().array("phones").expect("phones");
    let phone = phones.push(Some(json!({ "number": "12" })));
    assert!(!form.validate());
    assert_eq!(
        phone.field("number").expect("number").errors()[0].message(),
        "Enter a phone number"
    );

    phone
        .field("number")
        .expect("number")
        .set_value(json!("+44 20 7946 0000"))
        .expect("set");
    set(&form, "firstName", json!("Ada"));
    assert!(form.validate());
}

fn named_items(names: &[&str]) -> Form {
    let items = names.iter().map(|name| json!({ "name": name })).collect();
    Form::with_options(
        &GroupSchema::new().array_with(
            "items",
            ArraySchema::new(GroupSchema::new().field("name", FieldConfig::new("")))
                .with_items(items),
        ),
        strict(),
    )
}

fn require_first_name(form: &Form) {
    form.apply_validation_schema(|v: &mut ValidationBuilder, _: Path<Value>| {
        v.required("items[0].name");
    })
    .expect("schema");
}

#[test]
fn indexed_rules_move_to_the_item_that_takes_the_index() {
    let form = named_items(&["A", ""]);
    require_first_name(&form);
    assert!(form.validate());

    let items = form.root().array("items").expect("items");
    items.remove(0).expect("remove");
    assert_eq!(get(&form, "items[0].name"), json!(""));
    assert!(!form.validate());
    let name = items.at(0).expect("item").field("name").expect("name");
    assert_eq!(name.errors()[0].code(), "required");
}

#[test]
fn indexed_rules_survive_rebuilt_items() {
    let form = named_items(&["A", ""]);
    require_first_name(&form);
    let items = form.root().array("items").expect("items");

    items.set_value(json!([{ "name": "" }])).expect("set");
    assert!(!form.validate());

    items
        .set_value(json!([{ "name": "B" }, { "name": "" }]))
        .expect("set");
    assert!(form.validate());

    items.reset();
    assert!(form.validate());
    set(&form, "items[0].name", json!(""));
    assert!(!form.validate());
}

#[test]
fn rejected_validation_schemas_leave_nothing_attached() {
    let form = Form::with_options(
        &GroupSchema::new().field("name", FieldConfig::new("")),
        strict(),
    );
    let result = form.apply_validation_schema(|v: &mut ValidationBuilder, _: Path<Value>| {
        v.required("name");
        v.required("missing");
    });
    assert!(matches!(result, Err(FormError::FieldNotFound { .. })));
    assert!(form.validate());

    let form = named_items(&["", ""]);
    let items = form.root().array("items").expect("items");
    let result = items.apply_validation_schema(|v: &mut ValidationBuilder, item: Path<Value>| {
        v.required(item.key("name"));
        v.required(item.key("missing"));
    });
    assert!(result.is_err());
    assert!(form.validate());

    items.push(None);
    assert!(form.validate());
}

#[allow(dead_code)]
#[derive(crate::FormPaths)]
#[form_paths(rename_all = "camelCase")]
struct Applicant {
    registration_address: Address,
    residence_address: Address,
}

#[allow(dead_code)]
#[derive(crate::FormPaths)]
struct Address {
    city: String,
    zip: String,
    label: String,
}

fn address_rules(v: &mut ValidationBuilder, address: AddressPaths) {
    v.required(address.city());
    v.pattern(address.zip(), r"^\d{5}$").message("Enter a 5-digit zip");
}

fn address_label(b: &mut BehaviorBuilder, address: AddressPaths) {
    b.compute_from(address.label(), [address.zip(), address.city()], |values: &[Value]| {
        let parts = values
            .iter()
            .filter_map(Value::as_str)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>();
        json!(parts.join(" "))
    });
}

#[test]
fn reusable_schemas_apply_under_each_base() {
    let address = json!({ "city": "", "zip": "", "label": "" });
    let form = Form::with_options(
        &GroupSchema::infer(&json!({
            "registrationAddress": address,
            "residenceAddress": address,
        })),
        strict(),
    );
    form.apply_validation_schema(|v: &mut ValidationBuilder, applicant: ApplicantPaths| {
        v.apply(
            [applicant.registration_address(), applicant.residence_address()],
            address_rules,
        );
    })
    .expect("validation");
    form.apply_behavior_schema(|b: &mut BehaviorBuilder, applicant: ApplicantPaths| {
        b.apply(
            [applicant.registration_address(), applicant.residence_address()],
            address_label,
        );
    })
    .expect("behavior");

    set(&form, "registrationAddress.city", json!("Lyon"));
    set(&form, "registrationAddress.zip", json!("69001"));
    assert_eq!(get(&form, "registrationAddress.label"), json!("69001 Lyon"));
    assert_eq!(get(&form, "residenceAddress.label"), json!(""));

    assert!(!form.validate());
    let residence = form.root().group("residenceAddress").expect("residence");
    assert_eq!(residence.errors().len(), 1);
    assert_eq!(residence.errors()[0].code(), "required");
    assert!(
        form.root()
            .group("registrationAddress")
            .expect("registration")
            .errors()
            .is_empty()
    );

    set(&form, "residenceAddress.city", json!("Nice"));
    set(&form, "residenceAddress.zip", json!("06"));
    assert_eq!(residence.errors()[0].message(), "Enter a 5-digit zip");
    assert_eq!(get(&form, "residenceAddress.label"), json!("06 Nice"));

    set(&form, "residenceAddress.zip", json!("06000"));
    assert!(form.validate());
}

#[test]
fn clear_removes_items_and_their_behaviors() {
    let form = named_items(&["A", "B"]);
    let items = form.root().array("items").expect("items");
    let seen = Arc::new(AtomicUsize::new(0));
    {
        let seen = seen.clone();
        items
            .apply_behavior_schema(move |b: &mut BehaviorBuilder, item: Path<Value>| {
                let seen = seen.clone();
                b.watch_field(
                    item.key("name"),
                    move |_, _| {
                        seen.fetch_add(1, Ordering::SeqCst);
                    },
                    WatchOptions::default(),
                );
            })
            .expect("schema");
    }
    let first = items.at(0).expect("item");
    let first_name = first.field("name").expect("name");
    first_name.set_value(json!("A2")).expect("set");
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    items.clear();
    assert!(items.is_empty());
    assert_eq!(form.value(), json!({ "items": [] }));
    assert!(items.dirty());

    first_name.set_value(json!("late")).expect("set");
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    let fresh = items.push(None).field("name").expect("name");
    fresh.set_value(json!("C")).expect("set");
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[test]
fn tree_rules_read_the_enabled_form_value() {
    let form = Form::with_options(
        &GroupSchema::infer(&json!({ "email": "", "phone": "", "contact": "" })),
        strict(),
    );
    form.apply_validation_schema(|v: &mut ValidationBuilder, _: Path<Value>| {
        v.validate_tree("contact", |ctx: &TreeContext| {
            let value = ctx.form_value();
            let reachable = ["email", "phone"].iter().any(|key| {
                value
                    .get(*key)
                    .and_then(Value::as_str)
                    .is_some_and(|text| !text.is_empty())
            });
            (!reachable).then(|| ValidationError::new("contact", "Add an email or a phone"))
        });
    })
    .expect("schema");

    assert!(!form.validate());
    set(&form, "phone", json!("555 0100"));
    assert!(form.validate());

    form.root().field("phone").expect("phone").disable();
    assert!(!form.validate());
    assert_eq!(form.root().errors()[0].code(), "contact");
}
