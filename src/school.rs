/*!
The in-memory school data snapshot.

This is demo data owned by the running server: events, images, materials
by grade level, students, and results. It is never persisted; handlers
mutate it through the `Glob`'s lock and it resets on restart.

The one invariant worth the name: every result references an existing
student, and deleting a student deletes its results.
*/
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const N_GRADE_LEVELS: usize = 7;

pub const SUBJECTS: &[&str] = &["Math", "English", "Science", "History", "Art"];

/// "Grade 1" through "Grade 7".
pub fn grade_levels() -> Vec<String> {
    (1..=N_GRADE_LEVELS).map(|n| format!("Grade {}", n)).collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Academic,
    Sports,
    Meeting,
    Cultural,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterialType {
    Pdf,
    Doc,
    Ppt,
    Video,
    Image,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Term {
    Q1,
    Q2,
    Q3,
    Q4,
    Final,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchoolImage {
    pub id: i64,
    pub url: String,
    pub alt: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventItem {
    pub id: i64,
    pub title: String,
    pub date: String,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StudentItem {
    pub id: i64,
    pub name: String,
    pub grade: String,
    pub email: String,
    pub phone: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultItem {
    pub id: i64,
    pub student_id: i64,
    pub subject: String,
    /// The score, 0-100.
    pub grade: i64,
    pub date: String,
    pub term: Term,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialItem {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MaterialType,
    pub size: String,
    pub upload_date: String,
}

// The form payloads the API accepts: each is its item minus the id
// (plus, for materials, the grade level the file belongs under).

#[derive(Clone, Debug, Deserialize)]
pub struct EventForm {
    pub title: String,
    pub date: String,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub description: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StudentForm {
    pub name: String,
    pub grade: String,
    pub email: String,
    pub phone: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeForm {
    pub student_id: i64,
    pub subject: String,
    pub grade: i64,
    pub date: String,
    pub term: Term,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MaterialForm {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MaterialType,
    pub grade: String,
    pub size: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct GradeAverage {
    pub grade: String,
    pub average: i64,
}

/// One row of the results view: a student and a per-subject score map.
#[derive(Clone, Debug, Serialize)]
pub struct StudentResults {
    pub id: i64,
    pub student: String,
    pub scores: HashMap<String, i64>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolData {
    #[serde(skip)]
    next_id: i64,
    pub events: Vec<EventItem>,
    pub school_images: Vec<SchoolImage>,
    pub materials: HashMap<String, Vec<MaterialItem>>,
    pub students: Vec<StudentItem>,
    pub results: Vec<ResultItem>,
}

impl SchoolData {
    pub fn empty() -> Self {
        Self {
            next_id: 1,
            events: Vec::new(),
            school_images: Vec::new(),
            materials: HashMap::new(),
            students: Vec::new(),
            results: Vec::new(),
        }
    }

    /// The dataset the server starts with. Seed ids are small literals;
    /// `next_id` starts well clear of them.
    pub fn demo() -> Self {
        let events = vec![
            EventItem {
                id: 1, title: "Science Fair".to_owned(),
                date: "2024-09-15".to_owned(), kind: EventType::Academic,
                description: "Annual science exhibition".to_owned(),
            },
            EventItem {
                id: 2, title: "Sports Day".to_owned(),
                date: "2024-09-20".to_owned(), kind: EventType::Sports,
                description: "Inter-class competitions".to_owned(),
            },
            EventItem {
                id: 3, title: "Parent Meeting".to_owned(),
                date: "2024-09-25".to_owned(), kind: EventType::Meeting,
                description: "Quarterly progress review".to_owned(),
            },
        ];

        let school_images = vec![
            SchoolImage { id: 1, url: "/static/img/building.jpg".to_owned(), alt: "School Building".to_owned() },
            SchoolImage { id: 2, url: "/static/img/learning.jpg".to_owned(), alt: "Students Learning".to_owned() },
            SchoolImage { id: 3, url: "/static/img/library.jpg".to_owned(), alt: "Library".to_owned() },
            SchoolImage { id: 4, url: "/static/img/lab.jpg".to_owned(), alt: "Science Lab".to_owned() },
        ];

        let mut materials: HashMap<String, Vec<MaterialItem>> = HashMap::new();
        materials.insert("Grade 1".to_owned(), vec![
            MaterialItem {
                id: 1, name: "Math Workbook".to_owned(), kind: MaterialType::Pdf,
                size: "2.3 MB".to_owned(), upload_date: "2024-08-01".to_owned(),
            },
            MaterialItem {
                id: 2, name: "Reading Exercises".to_owned(), kind: MaterialType::Pdf,
                size: "1.8 MB".to_owned(), upload_date: "2024-08-01".to_owned(),
            },
        ]);
        materials.insert("Grade 2".to_owned(), vec![
            MaterialItem {
                id: 3, name: "Science Activities".to_owned(), kind: MaterialType::Pdf,
                size: "3.1 MB".to_owned(), upload_date: "2024-08-01".to_owned(),
            },
            MaterialItem {
                id: 4, name: "Art Projects".to_owned(), kind: MaterialType::Pdf,
                size: "2.7 MB".to_owned(), upload_date: "2024-08-01".to_owned(),
            },
        ]);

        let students = vec![
            StudentItem { id: 1, name: "Alice Johnson".to_owned(), grade: "Grade 1".to_owned(), email: "alice@email.com".to_owned(), phone: "123-456-7890".to_owned() },
            StudentItem { id: 2, name: "Bob Smith".to_owned(), grade: "Grade 1".to_owned(), email: "bob@email.com".to_owned(), phone: "123-456-7891".to_owned() },
            StudentItem { id: 3, name: "Carol Davis".to_owned(), grade: "Grade 2".to_owned(), email: "carol@email.com".to_owned(), phone: "123-456-7892".to_owned() },
            StudentItem { id: 4, name: "David Wilson".to_owned(), grade: "Grade 2".to_owned(), email: "david@email.com".to_owned(), phone: "123-456-7893".to_owned() },
        ];

        let results = vec![
            ResultItem { id: 1, student_id: 1, subject: "Math".to_owned(), grade: 85, date: "2024-08-15".to_owned(), term: Term::Q1 },
            ResultItem { id: 2, student_id: 1, subject: "English".to_owned(), grade: 78, date: "2024-08-15".to_owned(), term: Term::Q1 },
            ResultItem { id: 3, student_id: 1, subject: "Science".to_owned(), grade: 92, date: "2024-08-15".to_owned(), term: Term::Q1 },
            ResultItem { id: 4, student_id: 2, subject: "Math".to_owned(), grade: 76, date: "2024-08-15".to_owned(), term: Term::Q1 },
            ResultItem { id: 5, student_id: 2, subject: "English".to_owned(), grade: 88, date: "2024-08-15".to_owned(), term: Term::Q1 },
            ResultItem { id: 6, student_id: 2, subject: "Science".to_owned(), grade: 79, date: "2024-08-15".to_owned(), term: Term::Q1 },
        ];

        Self {
            next_id: 100,
            events,
            school_images,
            materials,
            students,
            results,
        }
    }

    fn next_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    //
    //
    // EVENTS
    //
    //

    pub fn add_event(&mut self, form: EventForm) -> i64 {
        log::trace!("SchoolData::add_event( {:?} ) called.", &form);

        let id = self.next_id();
        self.events.push(EventItem {
            id,
            title: form.title,
            date: form.date,
            kind: form.kind,
            description: form.description,
        });
        id
    }

    pub fn update_event(&mut self, id: i64, form: EventForm) -> bool {
        log::trace!("SchoolData::update_event( {}, {:?} ) called.", &id, &form);

        match self.events.iter_mut().find(|e| e.id == id) {
            Some(e) => {
                e.title = form.title;
                e.date = form.date;
                e.kind = form.kind;
                e.description = form.description;
                true
            },
            None => false,
        }
    }

    pub fn delete_event(&mut self, id: i64) -> bool {
        log::trace!("SchoolData::delete_event( {} ) called.", &id);

        let n = self.events.len();
        self.events.retain(|e| e.id != id);
        self.events.len() < n
    }

    //
    //
    // STUDENTS
    //
    //

    pub fn add_student(&mut self, form: StudentForm) -> i64 {
        log::trace!("SchoolData::add_student( {:?} ) called.", &form);

        let id = self.next_id();
        self.students.push(StudentItem {
            id,
            name: form.name,
            grade: form.grade,
            email: form.email,
            phone: form.phone,
        });
        id
    }

    pub fn update_student(&mut self, id: i64, form: StudentForm) -> bool {
        log::trace!("SchoolData::update_student( {}, {:?} ) called.", &id, &form);

        match self.students.iter_mut().find(|s| s.id == id) {
            Some(s) => {
                s.name = form.name;
                s.grade = form.grade;
                s.email = form.email;
                s.phone = form.phone;
                true
            },
            None => false,
        }
    }

    /**
    Removes the student and every result that references it.

    Returns whether the student existed and how many results went with it.
    */
    pub fn delete_student(&mut self, id: i64) -> (bool, usize) {
        log::trace!("SchoolData::delete_student( {} ) called.", &id);

        let n = self.students.len();
        self.students.retain(|s| s.id != id);
        if self.students.len() == n {
            return (false, 0);
        }

        let n_results = self.results.len();
        self.results.retain(|r| r.student_id != id);
        (true, n_results - self.results.len())
    }

    //
    //
    // RESULTS
    //
    //

    pub fn add_result(&mut self, form: GradeForm) -> Result<i64, String> {
        log::trace!("SchoolData::add_result( {:?} ) called.", &form);

        if !self.students.iter().any(|s| s.id == form.student_id) {
            return Err(format!(
                "There is no student with id {}.", &form.student_id
            ));
        }

        let id = self.next_id();
        self.results.push(ResultItem {
            id,
            student_id: form.student_id,
            subject: form.subject,
            grade: form.grade,
            date: form.date,
            term: form.term,
        });
        Ok(id)
    }

    pub fn update_result(&mut self, id: i64, form: GradeForm) -> Result<bool, String> {
        log::trace!("SchoolData::update_result( {}, {:?} ) called.", &id, &form);

        if !self.students.iter().any(|s| s.id == form.student_id) {
            return Err(format!(
                "There is no student with id {}.", &form.student_id
            ));
        }

        match self.results.iter_mut().find(|r| r.id == id) {
            Some(r) => {
                r.student_id = form.student_id;
                r.subject = form.subject;
                r.grade = form.grade;
                r.date = form.date;
                r.term = form.term;
                Ok(true)
            },
            None => Ok(false),
        }
    }

    pub fn delete_result(&mut self, id: i64) -> bool {
        log::trace!("SchoolData::delete_result( {} ) called.", &id);

        let n = self.results.len();
        self.results.retain(|r| r.id != id);
        self.results.len() < n
    }

    //
    //
    // MATERIALS
    //
    //

    pub fn add_material(&mut self, form: MaterialForm, upload_date: String) -> i64 {
        log::trace!(
            "SchoolData::add_material( {:?}, {:?} ) called.",
            &form, &upload_date
        );

        let id = self.next_id();
        self.materials.entry(form.grade).or_default().push(MaterialItem {
            id,
            name: form.name,
            kind: form.kind,
            size: form.size,
            upload_date,
        });
        id
    }

    pub fn delete_material(&mut self, grade: &str, id: i64) -> bool {
        log::trace!(
            "SchoolData::delete_material( {:?}, {} ) called.",
            grade, &id
        );

        match self.materials.get_mut(grade) {
            Some(v) => {
                let n = v.len();
                v.retain(|m| m.id != id);
                v.len() < n
            },
            None => false,
        }
    }

    //
    //
    // VIEWS
    //
    //

    /**
    The average score for each grade level: the rounded mean of every
    result belonging to a student in that level, or 0 when the level has
    no students or no results.
    */
    pub fn grade_averages(&self) -> Vec<GradeAverage> {
        let mut averages = Vec::with_capacity(N_GRADE_LEVELS);

        for grade in grade_levels() {
            let student_ids: Vec<i64> = self.students.iter()
                .filter(|s| s.grade == grade)
                .map(|s| s.id)
                .collect();
            if student_ids.is_empty() {
                averages.push(GradeAverage { grade, average: 0 });
                continue;
            }

            let scores: Vec<i64> = self.results.iter()
                .filter(|r| student_ids.contains(&r.student_id))
                .map(|r| r.grade)
                .collect();
            if scores.is_empty() {
                averages.push(GradeAverage { grade, average: 0 });
                continue;
            }

            let total: i64 = scores.iter().sum();
            let average = (total as f64 / scores.len() as f64).round() as i64;
            averages.push(GradeAverage { grade, average });
        }

        averages
    }

    /// Per-student subject/score rows for the given grade level. A later
    /// result for the same subject displaces an earlier one.
    pub fn results_by_grade(&self, grade: &str) -> Vec<StudentResults> {
        self.students.iter()
            .filter(|s| s.grade == grade)
            .map(|s| {
                let mut scores: HashMap<String, i64> = HashMap::new();
                for r in self.results.iter().filter(|r| r.student_id == s.id) {
                    scores.insert(r.subject.clone(), r.grade);
                }
                StudentResults {
                    id: s.id,
                    student: s.name.clone(),
                    scores,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn average_of(data: &SchoolData, grade: &str) -> i64 {
        data.grade_averages().into_iter()
            .find(|a| a.grade == grade)
            .unwrap()
            .average
    }

    #[test]
    fn averages_over_demo_data() {
        let data = SchoolData::demo();

        // (85 + 78 + 92 + 76 + 88 + 79) / 6
        assert_eq!(average_of(&data, "Grade 1"), 83);
        // Students but no results.
        assert_eq!(average_of(&data, "Grade 2"), 0);
        // No students at all.
        assert_eq!(average_of(&data, "Grade 7"), 0);
    }

    #[test]
    fn average_is_rounded_mean() {
        let mut data = SchoolData::empty();
        let id = data.add_student(StudentForm {
            name: "Only Student".to_owned(),
            grade: "Grade 3".to_owned(),
            email: "only@email.com".to_owned(),
            phone: "555-0100".to_owned(),
        });

        for (subject, score) in [("Math", 85), ("English", 78), ("Science", 92)] {
            data.add_result(GradeForm {
                student_id: id,
                subject: subject.to_owned(),
                grade: score,
                date: "2024-08-15".to_owned(),
                term: Term::Q1,
            }).unwrap();
        }
        assert_eq!(average_of(&data, "Grade 3"), 85);

        // (80 + 85) / 2 = 82.5 rounds up.
        let mut data = SchoolData::empty();
        let id = data.add_student(StudentForm {
            name: "Other Student".to_owned(),
            grade: "Grade 4".to_owned(),
            email: "other@email.com".to_owned(),
            phone: "555-0101".to_owned(),
        });
        for score in [80, 85] {
            data.add_result(GradeForm {
                student_id: id,
                subject: "Math".to_owned(),
                grade: score,
                date: "2024-08-15".to_owned(),
                term: Term::Q2,
            }).unwrap();
        }
        assert_eq!(average_of(&data, "Grade 4"), 83);
    }

    #[test]
    fn deleting_student_cascades_to_results() {
        let mut data = SchoolData::demo();
        let n_results = data.results.len();

        let (found, n_removed) = data.delete_student(1);
        assert!(found);
        assert_eq!(n_removed, 3);
        assert_eq!(data.results.len(), n_results - 3);
        assert!(!data.results.iter().any(|r| r.student_id == 1));

        // Gone means gone.
        let (found, n_removed) = data.delete_student(1);
        assert!(!found);
        assert_eq!(n_removed, 0);
    }

    #[test]
    fn result_requires_existing_student() {
        let mut data = SchoolData::demo();
        let e = data.add_result(GradeForm {
            student_id: 9999,
            subject: "Math".to_owned(),
            grade: 50,
            date: "2024-08-15".to_owned(),
            term: Term::Q1,
        }).unwrap_err();
        assert!(e.contains("9999"));
    }

    #[test]
    fn event_crud() {
        let mut data = SchoolData::empty();
        let id = data.add_event(EventForm {
            title: "Book Fair".to_owned(),
            date: "2024-10-01".to_owned(),
            kind: EventType::Cultural,
            description: "Used book sale".to_owned(),
        });

        let updated = data.update_event(id, EventForm {
            title: "Book Fair".to_owned(),
            date: "2024-10-02".to_owned(),
            kind: EventType::Cultural,
            description: "Used book sale, rescheduled".to_owned(),
        });
        assert!(updated);
        assert_eq!(data.events[0].date, "2024-10-02");

        assert!(data.delete_event(id));
        assert!(!data.delete_event(id));
    }

    #[test]
    fn materials_add_and_delete() {
        let mut data = SchoolData::demo();
        let id = data.add_material(
            MaterialForm {
                name: "History Notes".to_owned(),
                kind: MaterialType::Doc,
                grade: "Grade 5".to_owned(),
                size: "1.0 MB".to_owned(),
            },
            "2024-09-01".to_owned(),
        );

        assert_eq!(data.materials.get("Grade 5").unwrap().len(), 1);
        assert!(data.delete_material("Grade 5", id));
        assert!(!data.delete_material("Grade 5", id));
        assert!(!data.delete_material("Grade 6", id));
    }

    #[test]
    fn results_view_rows() {
        let data = SchoolData::demo();
        let rows = data.results_by_grade("Grade 1");
        assert_eq!(rows.len(), 2);
        let alice = rows.iter().find(|r| r.student == "Alice Johnson").unwrap();
        assert_eq!(alice.scores.get("Science"), Some(&92));

        assert!(data.results_by_grade("Grade 6").is_empty());
    }
}
