//! Domain code composing queries through a repository façade, without being
//! coupled to a backend.

use quell::builder::{field, has};
use quell::value::{Record, Value};
use quell::{Access, Error, MemoryQuerySet, QuerySet, Result};

#[derive(Debug, Clone)]
struct Giftcard {
    value: i64,
    reason: String,
}

#[derive(Debug, Clone)]
struct User {
    name: String,
    points: i64,
    giftcards: Vec<Giftcard>,
}

impl User {
    fn new(name: &str, points: i64, giftcards: &[(i64, &str)]) -> Self {
        User {
            name: name.to_string(),
            points,
            giftcards: giftcards
                .iter()
                .map(|(value, reason)| Giftcard {
                    value: *value,
                    reason: reason.to_string(),
                })
                .collect(),
        }
    }
}

impl Access for User {
    fn get(&self, name: &str) -> Result<Value> {
        match name {
            "name" => Ok(self.name.as_str().into()),
            "points" => Ok(self.points.into()),
            "giftcards" => Ok(Value::List(
                self.giftcards
                    .iter()
                    .map(|giftcard| {
                        Value::Record(
                            Record::new()
                                .with("value", giftcard.value)
                                .with("reason", giftcard.reason.as_str()),
                        )
                    })
                    .collect(),
            )),
            _ => Err(Error::access(name).into()),
        }
    }
}

/// The repository hides the backend; the service only speaks expressions.
struct UserRepository {
    users: MemoryQuerySet<User>,
}

impl UserRepository {
    fn new(source: impl Fn() -> Vec<User> + 'static) -> Self {
        UserRepository {
            users: MemoryQuerySet::new(source),
        }
    }
}

struct UserService {
    repository: UserRepository,
    min_points: i64,
    welcome_reason: &'static str,
}

impl UserService {
    fn users_eligible_for_giftcard(&self) -> Result<Vec<User>> {
        self.repository
            .users
            .filter(field("points").gte(self.min_points))
            .exclude(has("giftcards").where_(field("reason").eq(self.welcome_reason)))
            .execute()
    }
}

#[test]
fn users_over_the_threshold_without_a_welcome_giftcard_are_eligible() {
    let service = UserService {
        repository: UserRepository::new(|| {
            vec![
                User::new("Jane Doe", 1200, &[(250, "welcome giftcard")]),
                User::new("John Doe", 600, &[]),
                User::new("Jane Roe", 1000, &[]),
                User::new("Jane Poe", 999, &[]),
            ]
        }),
        min_points: 1000,
        welcome_reason: "welcome giftcard",
    };

    let eligible = service.users_eligible_for_giftcard().unwrap();
    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].name, "Jane Roe");
    assert_eq!(eligible[0].points, 1000);
}
