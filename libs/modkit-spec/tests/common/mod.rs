#![allow(dead_code)]

use modkit_spec::{FieldError, FieldRef, NavRef, Record, Value};

#[derive(Clone, Debug, PartialEq)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub age: i32,
    pub city: String,
    pub is_disabled: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Address;

#[derive(Clone, Debug, PartialEq)]
pub struct Country;

impl Person {
    pub const ID: FieldRef<Person, i64> = FieldRef::new("id");
    pub const NAME: FieldRef<Person, String> = FieldRef::new("name");
    pub const AGE: FieldRef<Person, i32> = FieldRef::new("age");
    pub const CITY: FieldRef<Person, String> = FieldRef::new("city");
    pub const ADDRESS: NavRef<Person, Address> = NavRef::new("address");
}

impl Address {
    pub const COUNTRY: NavRef<Address, Country> = NavRef::new("country");
}

impl Record for Person {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::Number(self.id.into())),
            "name" => Some(Value::String(self.name.clone())),
            "age" => Some(Value::Number(self.age.into())),
            "city" => Some(Value::String(self.city.clone())),
            "is_disabled" => Some(Value::Bool(self.is_disabled)),
            _ => None,
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> Result<(), FieldError> {
        match (name, value) {
            ("city", Value::String(city)) => self.city = city,
            ("is_disabled", Value::Bool(b)) => self.is_disabled = b,
            (other, _) => return Err(FieldError::ReadOnly(other.to_owned())),
        }
        Ok(())
    }
}

pub fn person(id: i64, name: &str, age: i32, city: &str) -> Person {
    Person {
        id,
        name: name.to_owned(),
        age,
        city: city.to_owned(),
        is_disabled: false,
    }
}

pub fn five_people() -> Vec<Person> {
    vec![
        person(1, "Ann", 31, "Oslo"),
        person(2, "Bob", 17, "Rome"),
        person(3, "Cid", 45, "Oslo"),
        person(4, "Dee", 22, "Lima"),
        person(5, "Eve", 19, "Rome"),
    ]
}
