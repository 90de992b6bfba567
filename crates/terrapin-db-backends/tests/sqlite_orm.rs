//! End-to-end ORM tests against in-memory SQLite: CRUD, relations,
//! prefetching, aggregation, null semantics and transactions.

mod common;

use std::sync::Arc;

use terrapin_core::TerrapinError;
use terrapin_db::query::{Count, Expression, Prefetch, F, Q};
use terrapin_db::{atomic, in_transaction, DbClient, Instance, Manager, Value};

use common::{setup, QueryCounter};

async fn tournament(tournaments: &Manager, db: &QueryCounter, name: &str) -> Instance {
    tournaments.create(db, &[("name", Value::from(name))]).await.unwrap()
}

async fn event(events: &Manager, db: &QueryCounter, name: &str, tournament: &Instance) -> Instance {
    let mut event = events.build();
    event.set("name", name).unwrap();
    event.set_related("tournament", tournament).unwrap();
    event.save(db).await.unwrap();
    event
}

#[tokio::test]
async fn test_foreign_key_round_trip() {
    let (registry, db) = setup().await;
    let tournaments = registry.manager("models.Tournament").unwrap();
    let events = registry.manager("models.Event").unwrap();

    let open = tournament(&tournaments, &db, "Open").await;
    let final_ = event(&events, &db, "Final", &open).await;
    assert_eq!(final_.pk(), Value::Int(1));
    assert_eq!(final_.get("tournament_id").unwrap(), &open.pk());

    let mut fetched = events
        .get(db.as_ref(), Q::new("name", "Final"))
        .await
        .unwrap();
    assert!(fetched.related_object("tournament").is_err());
    fetched.fetch_related(db.as_ref(), &["tournament"]).await.unwrap();
    let related = fetched.related_object("tournament").unwrap().unwrap();
    assert_eq!(related.get("name").unwrap(), &Value::from("Open"));

    // Backward traversal in filters joins through the relation.
    let by_event = tournaments
        .filter(Q::new("events__name", "Final"))
        .all(db.as_ref())
        .await
        .unwrap();
    assert_eq!(by_event.len(), 1);
    assert_eq!(by_event[0].pk(), open.pk());

    // Filtering by an instance is the same as filtering by its key.
    let by_instance = events
        .filter(Q::instance("tournament", open.to_ref().unwrap()))
        .count(db.as_ref())
        .await
        .unwrap();
    assert_eq!(by_instance, 1);
}

#[tokio::test]
async fn test_many_to_many_is_symmetric() {
    let (registry, db) = setup().await;
    let tournaments = registry.manager("models.Tournament").unwrap();
    let events = registry.manager("models.Event").unwrap();
    let teams = registry.manager("models.Team").unwrap();

    let open = tournament(&tournaments, &db, "Open").await;
    let final_ = event(&events, &db, "Final", &open).await;
    let red = teams.create(db.as_ref(), &[("name", Value::from("Red"))]).await.unwrap();
    let blue = teams.create(db.as_ref(), &[("name", Value::from("Blue"))]).await.unwrap();

    let participants = final_.m2m("participants").unwrap();
    participants.add(db.as_ref(), &[&red, &blue]).await.unwrap();
    // Re-adding an existing pair is a no-op.
    participants.add(db.as_ref(), &[&red]).await.unwrap();
    assert_eq!(participants.all().count(db.as_ref()).await.unwrap(), 2);

    let mut red = teams.get(db.as_ref(), Q::new("name", "Red")).await.unwrap();
    red.fetch_related(db.as_ref(), &["events"]).await.unwrap();
    let red_events = red.related_set("events").unwrap();
    assert_eq!(red_events.len(), 1);
    assert_eq!(red_events[0].get("name").unwrap(), &Value::from("Final"));

    let removed = participants.remove(db.as_ref(), &[&blue]).await.unwrap();
    assert_eq!(removed, 1);
    let names = participants
        .all()
        .values_list(db.as_ref(), &["name"], true)
        .await
        .unwrap();
    assert_eq!(names, vec![Value::from("Red")]);

    participants.clear(db.as_ref()).await.unwrap();
    assert!(!participants.all().exists(db.as_ref()).await.unwrap());
}

#[tokio::test]
async fn test_membership_filters_across_relations() {
    let (registry, db) = setup().await;
    let tournaments = registry.manager("models.Tournament").unwrap();
    let events = registry.manager("models.Event").unwrap();
    let teams = registry.manager("models.Team").unwrap();

    let open = tournament(&tournaments, &db, "Open").await;
    let cup = tournament(&tournaments, &db, "Cup").await;
    let e1 = event(&events, &db, "E1", &open).await;
    let e2 = event(&events, &db, "E2", &cup).await;
    event(&events, &db, "E3", &cup).await;
    let red = teams.create(db.as_ref(), &[("name", Value::from("Red"))]).await.unwrap();
    let blue = teams.create(db.as_ref(), &[("name", Value::from("Blue"))]).await.unwrap();
    e1.m2m("participants").unwrap().add(db.as_ref(), &[&red, &blue]).await.unwrap();
    e2.m2m("participants").unwrap().add(db.as_ref(), &[&blue]).await.unwrap();

    let names = |qs: terrapin_db::QuerySet| {
        let db = Arc::clone(&db);
        async move {
            qs.order_by(&["name"])
                .values_list(db.as_ref(), &["name"], true)
                .await
                .unwrap()
        }
    };

    // Forward many-to-many.
    let with_red = names(events.filter(Q::new("participants__in", vec![red.pk()]))).await;
    assert_eq!(with_red, vec![Value::from("E1")]);
    let without_red = names(events.filter(Q::new("participants__not_in", vec![red.pk()]))).await;
    assert_eq!(without_red, vec![Value::from("E2"), Value::from("E3")]);

    // Mirrored many-to-many.
    let in_e2 = names(teams.filter(Q::new("events__in", vec![e2.pk()]))).await;
    assert_eq!(in_e2, vec![Value::from("Blue")]);

    // Backward foreign key.
    let holding_e1 = names(tournaments.filter(Q::new("events__in", vec![e1.pk()]))).await;
    assert_eq!(holding_e1, vec![Value::from("Open")]);
    let holding_any = tournaments
        .filter(Q::new("events__in", vec![e1.pk(), e2.pk()]))
        .count(db.as_ref())
        .await
        .unwrap();
    assert_eq!(holding_any, 2);
}

#[tokio::test]
async fn test_prefetch_runs_one_query_per_relation() {
    let (registry, db) = setup().await;
    let tournaments = registry.manager("models.Tournament").unwrap();
    let events = registry.manager("models.Event").unwrap();
    let teams = registry.manager("models.Team").unwrap();

    let team = teams.create(db.as_ref(), &[("name", Value::from("Red"))]).await.unwrap();
    for t in ["A", "B", "C"] {
        let parent = tournament(&tournaments, &db, t).await;
        for e in ["heat", "final"] {
            let child = event(&events, &db, &format!("{t} {e}"), &parent).await;
            child.m2m("participants").unwrap().add(db.as_ref(), &[&team]).await.unwrap();
        }
    }

    db.reset_query_count();
    let fetched = tournaments
        .all()
        .prefetch_related(&["events"])
        .all(db.as_ref())
        .await
        .unwrap();
    assert_eq!(db.query_count(), 2);
    assert_eq!(fetched.len(), 3);
    for parent in &fetched {
        assert_eq!(parent.related_set("events").unwrap().len(), 2);
    }

    db.reset_query_count();
    let fetched = tournaments
        .all()
        .prefetch_related(&["events__participants"])
        .all(db.as_ref())
        .await
        .unwrap();
    assert_eq!(db.query_count(), 3);
    let heat = &fetched[0].related_set("events").unwrap()[0];
    assert_eq!(heat.related_set("participants").unwrap().len(), 1);

    // A custom queryset narrows what gets attached.
    db.reset_query_count();
    let finals = events.filter(Q::new("name__endswith", "final"));
    let fetched = tournaments
        .all()
        .prefetch(Prefetch::new("events", finals))
        .all(db.as_ref())
        .await
        .unwrap();
    assert_eq!(db.query_count(), 2);
    assert!(fetched
        .iter()
        .all(|t| t.related_set("events").unwrap().len() == 1));
}

#[tokio::test]
async fn test_annotation_with_having() {
    let (registry, db) = setup().await;
    let authors = registry.manager("models.Author").unwrap();
    let books = registry.manager("models.Book").unwrap();

    for (author, titles) in [("Ann", 3), ("Bob", 1), ("Cid", 0)] {
        let author = authors
            .create(db.as_ref(), &[("name", Value::from(author))])
            .await
            .unwrap();
        for i in 0..titles {
            let mut book = books.build();
            book.set("name", format!("Book {i}")).unwrap();
            book.set("rating", f64::from(i)).unwrap();
            book.set_related("author", &author).unwrap();
            book.save(db.as_ref()).await.unwrap();
        }
    }

    let prolific = authors
        .all()
        .annotate("count", Count("books"))
        .filter(Q::new("count__gt", 1))
        .values(db.as_ref(), &["name", "count"])
        .await
        .unwrap();
    assert_eq!(prolific.len(), 1);
    assert_eq!(prolific[0]["name"], Value::from("Ann"));
    assert_eq!(prolific[0]["count"], Value::Int(3));

    let ranked = authors
        .all()
        .annotate("count", Count("books"))
        .order_by(&["-count", "name"])
        .values_list(db.as_ref(), &["name", "count"], false)
        .await
        .unwrap();
    assert_eq!(
        ranked,
        vec![
            Value::List(vec![Value::from("Ann"), Value::Int(3)]),
            Value::List(vec![Value::from("Bob"), Value::Int(1)]),
            Value::List(vec![Value::from("Cid"), Value::Int(0)]),
        ]
    );

    let grouped = books
        .all()
        .annotate("count", Count("id"))
        .group_by(&["author__name"])
        .order_by(&["author__name"])
        .values(db.as_ref(), &["author__name", "count"])
        .await
        .unwrap();
    assert_eq!(grouped.len(), 2);
    assert_eq!(grouped[0]["author__name"], Value::from("Ann"));
    assert_eq!(grouped[0]["count"], Value::Int(3));
}

#[tokio::test]
async fn test_not_lookups_include_nulls() {
    let (registry, db) = setup().await;
    let tournaments = registry.manager("models.Tournament").unwrap();
    for (name, desc) in [("A", Value::from("x")), ("B", Value::from("y")), ("C", Value::Null)] {
        tournaments
            .create(db.as_ref(), &[("name", Value::from(name)), ("desc", desc)])
            .await
            .unwrap();
    }

    let not_x = tournaments
        .filter(Q::new("desc__not", "x"))
        .values_list(db.as_ref(), &["name"], true)
        .await
        .unwrap();
    assert_eq!(not_x, vec![Value::from("B"), Value::from("C")]);

    let not_in = tournaments
        .filter(Q::new("desc__not_in", vec![Value::from("x"), Value::from("y")]))
        .count(db.as_ref())
        .await
        .unwrap();
    assert_eq!(not_in, 1);

    let null = tournaments
        .filter(Q::new("desc__isnull", true))
        .count(db.as_ref())
        .await
        .unwrap();
    assert_eq!(null, 1);

    let excluded = tournaments
        .exclude(Q::new("name", "A") | Q::new("name", "B"))
        .count(db.as_ref())
        .await
        .unwrap();
    assert_eq!(excluded, 1);
}

#[tokio::test]
async fn test_update_delete_and_lookup_errors() {
    let (registry, db) = setup().await;
    let teams = registry.manager("models.Team").unwrap();
    teams.create(db.as_ref(), &[("name", Value::from("Red"))]).await.unwrap();
    teams
        .create(db.as_ref(), &[("name", Value::from("Blue")), ("rating", Value::from(5))])
        .await
        .unwrap();

    let changed = teams
        .filter(Q::new("name", "Red"))
        .update(db.as_ref(), &[("rating", F("rating") + Expression::value(10))])
        .await
        .unwrap();
    assert_eq!(changed, 1);
    let red = teams.get(db.as_ref(), Q::new("name", "Red")).await.unwrap();
    assert_eq!(red.get("rating").unwrap(), &Value::Int(10));

    let err = teams.get(db.as_ref(), Q::new("name", "Green")).await.unwrap_err();
    assert!(matches!(err, TerrapinError::DoesNotExist(_)));
    let err = teams.all().get(db.as_ref()).await.unwrap_err();
    assert!(matches!(err, TerrapinError::MultipleObjectsReturned(_)));

    let err = teams
        .create(db.as_ref(), &[("name", Value::from("Red"))])
        .await
        .unwrap_err();
    assert!(matches!(err, TerrapinError::IntegrityError(_)));

    let (blue, created) = teams
        .get_or_create(db.as_ref(), &[("name", Value::from("Blue"))], &[])
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(blue.get("rating").unwrap(), &Value::Int(5));
    let (_, created) = teams
        .get_or_create(
            db.as_ref(),
            &[("name", Value::from("Green"))],
            &[("rating", Value::from(7))],
        )
        .await
        .unwrap();
    assert!(created);

    let deleted = teams
        .filter(Q::new("rating__gte", 7))
        .delete(db.as_ref())
        .await
        .unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(teams.all().count(db.as_ref()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_instance_lifecycle() {
    let (registry, db) = setup().await;
    let events = registry.manager("models.Event").unwrap();
    let tournaments = registry.manager("models.Tournament").unwrap();
    let open = tournament(&tournaments, &db, "Open").await;

    let mut final_ = events.build();
    final_.set("name", "Final").unwrap();
    final_.set("prize", 1250).unwrap();
    final_.set_related("tournament", &open).unwrap();
    final_.save(db.as_ref()).await.unwrap();

    let mut copy = events.get(db.as_ref(), Q::new("id", final_.pk())).await.unwrap();
    assert_eq!(copy.get("prize").unwrap(), &Value::from("1250.00"));

    final_.set("name", "Grand Final").unwrap();
    final_.save(db.as_ref()).await.unwrap();
    copy.refresh_from_db(db.as_ref()).await.unwrap();
    assert_eq!(copy.get("name").unwrap(), &Value::from("Grand Final"));

    assert_eq!(final_.delete(db.as_ref()).await.unwrap(), 1);
    let err = copy.refresh_from_db(db.as_ref()).await.unwrap_err();
    assert!(matches!(err, TerrapinError::DoesNotExist(_)));
}

#[tokio::test]
async fn test_transactions() {
    let (registry, db) = setup().await;
    let teams = registry.manager("models.Team").unwrap();
    let client: Arc<dyn DbClient> = db;

    let txn = in_transaction(Arc::clone(&client)).await.unwrap();
    teams.create(&txn, &[("name", Value::from("Red"))]).await.unwrap();
    txn.rollback().await.unwrap();
    assert_eq!(teams.all().count(client.as_ref()).await.unwrap(), 0);

    let inner_teams = teams.clone();
    atomic(Arc::clone(&client), |txn| async move {
        inner_teams
            .create(txn.as_ref(), &[("name", Value::from("Blue"))])
            .await?;
        let nested = txn.savepoint().await?;
        inner_teams
            .create(&nested, &[("name", Value::from("Green"))])
            .await?;
        nested.rollback().await
    })
    .await
    .unwrap();
    let names = teams
        .all()
        .values_list(client.as_ref(), &["name"], true)
        .await
        .unwrap();
    assert_eq!(names, vec![Value::from("Blue")]);

    let failing_teams = teams.clone();
    let result: Result<(), TerrapinError> = atomic(Arc::clone(&client), |txn| async move {
        failing_teams
            .create(txn.as_ref(), &[("name", Value::from("Gold"))])
            .await?;
        failing_teams
            .create(txn.as_ref(), &[("name", Value::from("Blue"))])
            .await?;
        Ok(())
    })
    .await;
    assert!(matches!(result, Err(TerrapinError::IntegrityError(_))));
    assert_eq!(teams.all().count(client.as_ref()).await.unwrap(), 1);
}
